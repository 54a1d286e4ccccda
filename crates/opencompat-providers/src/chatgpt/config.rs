use std::collections::BTreeMap;

use opencompat_store::paths::env_u64;
use opencompat_store::OAuthConfig;

use crate::chatgpt::jwt;

pub const PROVIDER_ID: &str = "chatgpt";

pub const ENV_INSTRUCTIONS_REFRESH: &str = "OPENCOMPAT_CHATGPT_INSTRUCTIONS_REFRESH";

pub const DEFAULT_REASONING_EFFORT: &str = "medium";
pub const DEFAULT_REASONING_SUMMARY: &str = "auto";
pub const DEFAULT_REASONING_COMPAT: &str = "none";
pub const DEFAULT_TEXT_VERBOSITY: &str = "medium";
/// Minutes between background instruction refreshes (24 hours).
pub const DEFAULT_INSTRUCTIONS_REFRESH_MINS: u64 = 24 * 60;
/// Disk cache stays usable for 7 days before a staleness warning.
pub const INSTRUCTIONS_DISK_TTL_SECS: i64 = 7 * 24 * 60 * 60;

pub const RESPONSES_URL: &str = "https://chatgpt.com/backend-api/codex/responses";
pub const GITHUB_RELEASES_API: &str = "https://api.github.com/repos/openai/codex/releases/latest";
pub const GITHUB_RAW_BASE_URL: &str = "https://raw.githubusercontent.com/openai/codex";

pub const OAUTH_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
pub const OAUTH_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
pub const OAUTH_AUTHORIZE_URL: &str = "https://auth.openai.com/oauth/authorize";
pub const OAUTH_CALLBACK_PORT: u16 = 1455;
pub const OAUTH_REDIRECT_URI: &str = "http://localhost:1455/auth/callback";
pub const OAUTH_SCOPES: &str = "openid profile email offline_access";

/// Codex CLI identification sent with every responses call.
pub const ORIGINATOR: &str = "codex_cli_rs";
pub const CODEX_VERSION: &str = "0.77.0";

/// Provider defaults, overridable per request via the `X-*` headers.
#[derive(Debug, Clone)]
pub struct Config {
    pub reasoning_effort: String,
    pub reasoning_summary: String,
    pub reasoning_compat: String,
    pub text_verbosity: String,
    pub instructions_refresh_mins: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            reasoning_effort: DEFAULT_REASONING_EFFORT.to_string(),
            reasoning_summary: DEFAULT_REASONING_SUMMARY.to_string(),
            reasoning_compat: DEFAULT_REASONING_COMPAT.to_string(),
            text_verbosity: DEFAULT_TEXT_VERBOSITY.to_string(),
            instructions_refresh_mins: env_u64(
                ENV_INSTRUCTIONS_REFRESH,
                DEFAULT_INSTRUCTIONS_REFRESH_MINS,
            ),
        }
    }

    /// Copy of the defaults with per-request header overrides applied.
    pub fn with_overrides(&self, summary: &str, compat: &str, verbosity: &str) -> Self {
        let mut cfg = self.clone();
        if !summary.is_empty() {
            cfg.reasoning_summary = summary.to_string();
        }
        if !compat.is_empty() {
            cfg.reasoning_compat = compat.to_string();
        }
        if !verbosity.is_empty() {
            cfg.text_verbosity = verbosity.to_string();
        }
        cfg
    }
}

pub fn oauth_config() -> OAuthConfig {
    let mut extra = BTreeMap::new();
    extra.insert("id_token_add_organizations".to_string(), "true".to_string());
    extra.insert("codex_cli_simplified_flow".to_string(), "true".to_string());
    extra.insert("originator".to_string(), ORIGINATOR.to_string());

    OAuthConfig {
        token_url: OAUTH_TOKEN_URL.to_string(),
        authorize_url: OAUTH_AUTHORIZE_URL.to_string(),
        redirect_uri: OAUTH_REDIRECT_URI.to_string(),
        callback_port: OAUTH_CALLBACK_PORT,
        scopes: OAUTH_SCOPES.to_string(),
        client_id: OAUTH_CLIENT_ID.to_string(),
        extra_auth_params: extra,
        extract_account_id: Some(jwt::extract_account_id),
        extract_email: Some(jwt::extract_email),
    }
}
