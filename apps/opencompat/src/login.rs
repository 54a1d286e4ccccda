use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use opencompat_provider_core::ProviderMeta;
use opencompat_store::{
    ApiKeyCredentials, AuthMethod, CredentialStore, DeviceFlowConfig, OAuthConfig,
    OAuthCredentials, TokenData,
};

/// Dispatch to the provider's credential flow.
pub async fn login(store: &CredentialStore, meta: &ProviderMeta) -> Result<()> {
    match meta.auth_method {
        AuthMethod::OAuth => {
            let cfg = meta
                .oauth_cfg
                .as_ref()
                .context("provider has no oauth configuration")?;
            oauth_login(store, meta.id, cfg).await
        }
        AuthMethod::DeviceFlow => {
            let cfg = meta
                .device_cfg
                .as_ref()
                .context("provider has no device flow configuration")?;
            device_flow_login(store, meta.id, cfg).await
        }
        AuthMethod::ApiKey => api_key_login(store, meta.id),
    }
}

fn api_key_login(store: &CredentialStore, provider_id: &str) -> Result<()> {
    print!("Enter API key for {provider_id}: ");
    std::io::stdout().flush()?;
    let mut key = String::new();
    std::io::stdin().read_line(&mut key)?;
    let key = key.trim();
    if key.is_empty() {
        bail!("no API key entered");
    }

    store.save_api_key(
        provider_id,
        &ApiKeyCredentials {
            r#type: String::new(),
            api_key: key.to_string(),
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
        },
    )?;
    Ok(())
}

// ---- OAuth authorization-code flow with PKCE ----

struct Pkce {
    verifier: String,
    challenge: String,
}

fn generate_pkce() -> Pkce {
    let mut raw = [0u8; 32];
    rand::rng().fill_bytes(&mut raw);
    let verifier = URL_SAFE_NO_PAD.encode(raw);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    Pkce { verifier, challenge }
}

fn generate_state() -> String {
    let mut raw = [0u8; 16];
    rand::rng().fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

async fn oauth_login(store: &CredentialStore, provider_id: &str, cfg: &OAuthConfig) -> Result<()> {
    let pkce = generate_pkce();
    let state = generate_state();
    let auth_url = build_auth_url(cfg, &pkce.challenge, &state);

    let (code_tx, code_rx) = tokio::sync::oneshot::channel::<Result<String, String>>();
    let listener =
        tokio::net::TcpListener::bind(("127.0.0.1", cfg.callback_port))
            .await
            .with_context(|| format!("failed to listen on callback port {}", cfg.callback_port))?;

    let app = callback_router(state.clone(), code_tx);
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    println!("Opening browser for authentication...");
    if open_browser(&auth_url).is_err() {
        println!("Please open this URL in your browser:\n{auth_url}");
    }

    let code = match tokio::time::timeout(Duration::from_secs(300), code_rx).await {
        Ok(Ok(Ok(code))) => code,
        Ok(Ok(Err(message))) => {
            server.abort();
            bail!("login failed: {message}");
        }
        Ok(Err(_)) | Err(_) => {
            server.abort();
            bail!("login timed out");
        }
    };
    server.abort();

    let tokens = exchange_code(cfg, &code, &pkce.verifier).await?;
    store.set_oauth_from_token_data(provider_id, &tokens, cfg)?;
    Ok(())
}

fn callback_router(
    expected_state: String,
    code_tx: tokio::sync::oneshot::Sender<Result<String, String>>,
) -> axum::Router {
    use axum::extract::Query;
    use axum::response::Html;
    use std::collections::HashMap;
    use std::sync::Mutex;

    let tx = std::sync::Arc::new(Mutex::new(Some(code_tx)));
    axum::Router::new().route(
        "/auth/callback",
        axum::routing::get(move |Query(params): Query<HashMap<String, String>>| {
            let tx = tx.clone();
            let expected_state = expected_state.clone();
            async move {
                let send = |result: Result<String, String>| {
                    if let Some(tx) = tx.lock().expect("callback lock").take() {
                        let _ = tx.send(result);
                    }
                };

                if let Some(error) = params.get("error") {
                    let desc = params.get("error_description").cloned().unwrap_or_default();
                    send(Err(format!("{error} - {desc}")));
                    return Html(format!(
                        "<html><body><h1>Login Failed</h1><p>{desc}</p></body></html>"
                    ));
                }
                if params.get("state").map(String::as_str) != Some(expected_state.as_str()) {
                    send(Err("state mismatch".to_string()));
                    return Html(
                        "<html><body><h1>Login Failed</h1><p>State mismatch</p></body></html>"
                            .to_string(),
                    );
                }
                match params.get("code") {
                    Some(code) if !code.is_empty() => {
                        send(Ok(code.clone()));
                        Html(
                            "<html><body><h1>Login Successful!</h1><p>You can close this window.</p></body></html>"
                                .to_string(),
                        )
                    }
                    _ => {
                        send(Err("no authorization code received".to_string()));
                        Html(
                            "<html><body><h1>Login Failed</h1><p>No code received</p></body></html>"
                                .to_string(),
                        )
                    }
                }
            }
        }),
    )
}

fn build_auth_url(cfg: &OAuthConfig, challenge: &str, state: &str) -> String {
    let mut params = vec![
        ("client_id", cfg.client_id.clone()),
        ("redirect_uri", cfg.redirect_uri.clone()),
        ("response_type", "code".to_string()),
        ("scope", cfg.scopes.clone()),
        ("state", state.to_string()),
        ("code_challenge", challenge.to_string()),
        ("code_challenge_method", "S256".to_string()),
    ];
    for (key, value) in &cfg.extra_auth_params {
        params.push((key.as_str(), value.clone()));
    }

    let query: Vec<String> = params
        .iter()
        .map(|(key, value)| format!("{key}={}", url_encode(value)))
        .collect();
    format!("{}?{}", cfg.authorize_url, query.join("&"))
}

async fn exchange_code(cfg: &OAuthConfig, code: &str, verifier: &str) -> Result<TokenData> {
    let body = form_body(&[
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", &cfg.redirect_uri),
        ("client_id", &cfg.client_id),
        ("code_verifier", verifier),
    ]);

    let resp = wreq::Client::new()
        .post(&cfg.token_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await?;

    let status = resp.status().as_u16();
    let raw = resp.bytes().await?;

    if status != 200 {
        #[derive(Deserialize)]
        struct OAuthError {
            #[serde(default)]
            error: String,
            #[serde(default)]
            error_description: String,
        }
        if let Ok(err) = serde_json::from_slice::<OAuthError>(&raw) {
            if !err.error.is_empty() {
                bail!("{}: {}", err.error, err.error_description);
            }
        }
        bail!("token exchange failed with status {status}");
    }

    Ok(serde_json::from_slice(&raw)?)
}

// ---- Device authorization flow ----

#[derive(Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    interval: u64,
}

#[derive(Deserialize)]
struct DevicePollResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    error: String,
}

async fn device_flow_login(
    store: &CredentialStore,
    provider_id: &str,
    cfg: &DeviceFlowConfig,
) -> Result<()> {
    let device = request_device_code(cfg).await?;

    println!();
    println!("To authenticate, please:");
    println!("  1. Open: {}", device.verification_uri);
    println!("  2. Enter code: {}", device.user_code);
    println!();
    if open_browser(&device.verification_uri).is_err() {
        println!("Could not open browser automatically. Please open the URL manually.");
    }
    println!("Waiting for authorization...");

    // RFC 8628 minimum polling interval.
    let mut interval = device.interval.max(5);
    let deadline = OffsetDateTime::now_utc().unix_timestamp() + device.expires_in.max(60) as i64;

    while OffsetDateTime::now_utc().unix_timestamp() < deadline {
        tokio::time::sleep(Duration::from_secs(interval)).await;

        let poll = poll_for_token(cfg, &device.device_code).await?;
        if !poll.access_token.is_empty() {
            // The long-lived device token lives in the refresh_token slot;
            // access_token and expiry are filled by the provider on first
            // API use.
            store.save_oauth(
                provider_id,
                &OAuthCredentials {
                    r#type: String::new(),
                    access_token: String::new(),
                    refresh_token: poll.access_token,
                    id_token: String::new(),
                    expires_at: 0,
                    account_id: String::new(),
                    email: String::new(),
                },
            )?;
            return Ok(());
        }

        match poll.error.as_str() {
            "authorization_pending" => continue,
            "slow_down" => {
                interval += 5;
                continue;
            }
            "expired_token" => bail!("authorization request expired - please try again"),
            "access_denied" => bail!("authorization was denied by the user"),
            other if !other.is_empty() => bail!("authorization failed: {other}"),
            _ => bail!("unexpected response from token endpoint"),
        }
    }

    bail!("authorization request timed out - please try again")
}

async fn request_device_code(cfg: &DeviceFlowConfig) -> Result<DeviceCodeResponse> {
    let body = form_body(&[("client_id", &cfg.client_id), ("scope", &cfg.scopes)]);

    let mut builder = wreq::Client::new()
        .post(&cfg.device_code_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Accept", "application/json");
    if !cfg.user_agent.is_empty() {
        builder = builder.header("User-Agent", &cfg.user_agent);
    }

    let resp = builder.body(body).send().await?;
    let status = resp.status().as_u16();
    let raw = resp.bytes().await?;
    if status != 200 {
        bail!(
            "device code request failed with status {status}: {}",
            String::from_utf8_lossy(&raw)
        );
    }
    Ok(serde_json::from_slice(&raw)?)
}

async fn poll_for_token(cfg: &DeviceFlowConfig, device_code: &str) -> Result<DevicePollResponse> {
    let body = form_body(&[
        ("client_id", &cfg.client_id),
        ("device_code", device_code),
        ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
    ]);

    let mut builder = wreq::Client::new()
        .post(&cfg.access_token_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Accept", "application/json");
    if !cfg.user_agent.is_empty() {
        builder = builder.header("User-Agent", &cfg.user_agent);
    }

    let resp = builder.body(body).send().await?;
    let raw = resp.bytes().await?;
    Ok(serde_json::from_slice(&raw)?)
}

// ---- helpers ----

fn open_browser(url: &str) -> Result<()> {
    let mut cmd = match std::env::consts::OS {
        "macos" => {
            let mut cmd = std::process::Command::new("open");
            cmd.arg(url);
            cmd
        }
        "linux" => {
            let mut cmd = std::process::Command::new("xdg-open");
            cmd.arg(url);
            cmd
        }
        "windows" => {
            let mut cmd = std::process::Command::new("rundll32");
            cmd.arg("url.dll,FileProtocolHandler").arg(url);
            cmd
        }
        other => bail!("unsupported platform: {other}"),
    };
    cmd.spawn()?;
    Ok(())
}

fn form_body(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", url_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn url_encode(value: &str) -> String {
    let mut out = String::new();
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_challenge_is_sha256_of_verifier() {
        let pkce = generate_pkce();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()));
        assert_eq!(pkce.challenge, expected);
        assert!(pkce.verifier.len() >= 43);
    }

    #[test]
    fn auth_url_carries_pkce_and_extra_params() {
        let mut cfg = OAuthConfig {
            authorize_url: "https://auth.example.com/oauth/authorize".to_string(),
            redirect_uri: "http://localhost:1455/auth/callback".to_string(),
            scopes: "openid profile".to_string(),
            client_id: "client-1".to_string(),
            ..Default::default()
        };
        cfg.extra_auth_params
            .insert("originator".to_string(), "codex_cli_rs".to_string());

        let url = build_auth_url(&cfg, "challenge123", "state456");
        assert!(url.starts_with("https://auth.example.com/oauth/authorize?"));
        assert!(url.contains("code_challenge=challenge123"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=state456"));
        assert!(url.contains("originator=codex_cli_rs"));
        assert!(url.contains("scope=openid%20profile"));
    }
}
