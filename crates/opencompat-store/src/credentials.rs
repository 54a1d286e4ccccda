use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Safety margin subtracted from token expiry before treating it as expired.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// How a provider authenticates its user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    OAuth,
    ApiKey,
    DeviceFlow,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::OAuth => "oauth",
            AuthMethod::ApiKey => "api_key",
            AuthMethod::DeviceFlow => "device_flow",
        }
    }
}

/// OAuth record persisted per provider. `expires_at` is unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthCredentials {
    /// Always `"oauth"` on disk.
    #[serde(default, rename = "type")]
    pub r#type: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id_token: String,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

impl OAuthCredentials {
    /// Expired 60 seconds early so a token is never used at the boundary.
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc().unix_timestamp() + EXPIRY_MARGIN_SECS >= self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }
}

/// API-key record persisted per provider. `created_at` is unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyCredentials {
    /// Always `"api_key"` on disk.
    #[serde(default, rename = "type")]
    pub r#type: String,
    pub api_key: String,
    #[serde(default)]
    pub created_at: i64,
}

impl ApiKeyCredentials {
    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Token endpoint response shared by refresh and login flows.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub id_token: String,
    #[serde(default)]
    pub expires_in: i64,
}

/// Structured error body from an OAuth token endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

/// Claim extractor applied to a raw token; failures are ignored by callers.
pub type TokenExtractor = fn(&str) -> Option<String>;

/// Provider-specific OAuth endpoints and parameters.
#[derive(Debug, Clone, Default)]
pub struct OAuthConfig {
    pub token_url: String,
    pub authorize_url: String,
    pub redirect_uri: String,
    pub callback_port: u16,
    pub scopes: String,
    pub client_id: String,
    /// Non-standard parameters appended to the authorization URL.
    pub extra_auth_params: BTreeMap<String, String>,
    pub extract_account_id: Option<TokenExtractor>,
    pub extract_email: Option<TokenExtractor>,
}

/// Provider-specific device authorization flow endpoints.
#[derive(Debug, Clone, Default)]
pub struct DeviceFlowConfig {
    pub client_id: String,
    pub scopes: String,
    pub device_code_url: String,
    pub access_token_url: String,
    pub user_agent: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_honors_margin() {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut creds = OAuthCredentials {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: now + 3600,
            ..Default::default()
        };
        assert!(!creds.is_expired());

        // Inside the 60 second margin counts as expired.
        creds.expires_at = now + 30;
        assert!(creds.is_expired());

        creds.expires_at = now - 10;
        assert!(creds.is_expired());
    }

    #[test]
    fn validity_requires_both_tokens() {
        let creds = OAuthCredentials {
            access_token: "a".to_string(),
            ..Default::default()
        };
        assert!(!creds.is_valid());
    }
}
