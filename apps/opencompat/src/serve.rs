use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, info};

use opencompat_store::paths::{self, env_string, env_u16};
use opencompat_store::CredentialStore;

const ACKNOWLEDGMENT_FILE: &str = "acknowledged";
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

const DISCLAIMER: &str = "
================================================================================
                                    NOTICE
================================================================================

This is an independent open-source project for PERSONAL, NON-COMMERCIAL USE.
It is NOT affiliated with, endorsed by, or sponsored by any upstream provider.

By using this software, you acknowledge that:

1. You are responsible for compliance with all applicable terms of service.

2. You assume all risk for any consequences of your use.

3. The authors are not liable for any damages arising from your use.

4. This software is provided \"AS IS\" without warranty of any kind.

For full terms, see the LICENSE file.

================================================================================
";

pub async fn run() -> Result<()> {
    check_acknowledgment()?;

    let store = Arc::new(CredentialStore::new());
    let mut registry = opencompat_provider_core::Registry::new();
    opencompat_providers::register_all(&mut registry);
    registry.initialize(&store)?;

    if !registry.has_providers() {
        bail!("no providers logged in - run 'opencompat login <provider>' first");
    }

    // Synchronous init: instruction prefetch must succeed before we listen.
    registry.init_all().await.context("provider init failed")?;
    registry.start_all();

    let registry = Arc::new(registry);
    let app = opencompat_server::build_router(registry.clone());

    let host = env_string("OPENCOMPAT_HOST", "127.0.0.1");
    let port = env_u16("OPENCOMPAT_PORT", 8080);
    let bind = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    info!(addr = %bind, "server starting");
    info!("OpenAI-compatible API available at http://{bind}/v1");

    let notify = Arc::new(tokio::sync::Notify::new());
    let serve = {
        let notify = notify.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { notify.notified().await })
    };
    let serve = std::future::IntoFuture::into_future(serve);
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => {
            registry.close_all().await;
            return result.map_err(Into::into);
        }
        _ = shutdown_signal() => {
            notify.notify_waiters();
        }
    }

    // Drain in-flight connections, bounded by the shutdown deadline.
    if tokio::time::timeout(SHUTDOWN_DEADLINE, &mut serve).await.is_err() {
        error!("graceful shutdown exceeded deadline");
    }
    registry.close_all().await;
    info!("server stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received interrupt");
}

fn check_acknowledgment() -> Result<()> {
    let path = paths::data_dir().join(ACKNOWLEDGMENT_FILE);
    if path.exists() {
        return Ok(());
    }

    print!("{DISCLAIMER}\nDo you understand and agree to these terms? (yes/no): ");
    std::io::stdout().flush()?;

    let mut response = String::new();
    std::io::stdin().read_line(&mut response)?;
    if response.trim().to_lowercase() != "yes" {
        bail!("you must agree to the terms to use this software");
    }

    paths::ensure_data_dir()?;
    let stamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());
    std::fs::write(&path, format!("Acknowledged: {stamp}\n"))?;

    println!("\nThank you. Starting server...");
    Ok(())
}
