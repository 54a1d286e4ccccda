use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use time::OffsetDateTime;

use opencompat_provider_core::Registry;
use opencompat_store::paths::env_string;
use opencompat_store::{CredentialStore, StoreError};

mod cli;
mod login;
mod serve;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let args = Cli::parse();
    match args.command.unwrap_or(Command::Serve) {
        Command::Login { provider } => cmd_login(&provider).await,
        Command::Logout { provider } => cmd_logout(&provider),
        Command::Info => cmd_info(),
        Command::Models => cmd_models().await,
        Command::Serve => serve::run().await,
        Command::Version => {
            println!("opencompat {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn setup_logging() {
    use tracing_subscriber::EnvFilter;

    let level = env_string("OPENCOMPAT_LOG_LEVEL", "info");
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match env_string("OPENCOMPAT_LOG_FORMAT", "text").as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
}

fn build_registry() -> Registry {
    let mut registry = Registry::new();
    opencompat_providers::register_all(&mut registry);
    registry
}

async fn cmd_login(provider: &str) -> Result<()> {
    let registry = build_registry();
    let Some(meta) = registry.meta(provider) else {
        anyhow::bail!(
            "unknown provider: {provider} (known: {})",
            registry
                .metas()
                .map(|meta| meta.id)
                .collect::<Vec<_>>()
                .join(", ")
        );
    };

    let store = CredentialStore::new();
    login::login(&store, meta).await?;
    println!("Login successful!");
    Ok(())
}

fn cmd_logout(provider: &str) -> Result<()> {
    let registry = build_registry();
    if registry.meta(provider).is_none() {
        anyhow::bail!("unknown provider: {provider}");
    }

    let store = CredentialStore::new();
    store.delete(provider)?;
    println!("Logged out of {provider}.");
    Ok(())
}

fn cmd_info() -> Result<()> {
    let registry = build_registry();
    let store = CredentialStore::new();

    for meta in registry.metas() {
        println!("{} ({})", meta.display_name, meta.id);
        if !store.is_logged_in(meta.id) {
            println!("  Status: not logged in");
            continue;
        }

        match store.get_oauth(meta.id) {
            Ok(creds) => {
                if !creds.email.is_empty() {
                    println!("  Email: {}", creds.email);
                }
                if !creds.account_id.is_empty() {
                    println!("  Account ID: {}", creds.account_id);
                }
                if creds.expires_at > 0 {
                    let expires = OffsetDateTime::from_unix_timestamp(creds.expires_at)
                        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
                    println!("  Token expires: {expires}");
                    if creds.is_expired() {
                        println!("  Status: token expired (will refresh on next request)");
                    } else {
                        println!("  Status: token valid");
                    }
                } else {
                    println!("  Status: logged in");
                }
            }
            Err(StoreError::WrongType { .. }) => match store.get_api_key(meta.id) {
                Ok(_) => println!("  Status: logged in (api key)"),
                Err(err) => println!("  Status: {err}"),
            },
            Err(err) => println!("  Status: {err}"),
        }
    }
    Ok(())
}

async fn cmd_models() -> Result<()> {
    let store = Arc::new(CredentialStore::new());
    let mut registry = build_registry();
    registry.initialize(&store)?;

    if !registry.has_providers() {
        anyhow::bail!("no providers logged in - run 'opencompat login <provider>' first");
    }

    for model in registry.all_models().await {
        println!("{}", model.id);
    }
    Ok(())
}
