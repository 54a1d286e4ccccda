use opencompat_store::DeviceFlowConfig;
use opencompat_store::paths::env_u64;

pub const PROVIDER_ID: &str = "copilot";

pub const ENV_MODELS_REFRESH: &str = "OPENCOMPAT_COPILOT_MODELS_REFRESH";

/// Minutes between background model refreshes (24 hours).
pub const DEFAULT_MODELS_REFRESH_MINS: u64 = 24 * 60;
/// Disk cache stays usable for 7 days before a staleness warning.
pub const MODELS_DISK_TTL_SECS: i64 = 7 * 24 * 60 * 60;

pub const GITHUB_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
pub const GITHUB_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
pub const GITHUB_ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const GITHUB_SCOPES: &str = "read:user";

pub const TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";
pub const BASE_URL: &str = "https://api.githubcopilot.com";
pub const CHAT_URL: &str = "https://api.githubcopilot.com/chat/completions";
pub const MODELS_URL: &str = "https://api.githubcopilot.com/models";

pub const EDITOR_VERSION: &str = "vscode/1.95.3";
pub const EDITOR_PLUGIN_VERSION: &str = "copilot-chat/0.22.4";
pub const COPILOT_INTEGRATION_ID: &str = "vscode-chat";
pub const USER_AGENT_PRODUCT: &str = "GitHubCopilotChat";
pub const USER_AGENT_VERSION: &str = "0.22.4";
pub const DEVICE_FLOW_USER_AGENT: &str = "GitHubCopilotChat/0.22.4";

#[derive(Debug, Clone)]
pub struct Config {
    pub models_refresh_mins: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            models_refresh_mins: env_u64(ENV_MODELS_REFRESH, DEFAULT_MODELS_REFRESH_MINS),
        }
    }
}

pub fn device_flow_config() -> DeviceFlowConfig {
    DeviceFlowConfig {
        client_id: GITHUB_CLIENT_ID.to_string(),
        scopes: GITHUB_SCOPES.to_string(),
        device_code_url: GITHUB_DEVICE_CODE_URL.to_string(),
        access_token_url: GITHUB_ACCESS_TOKEN_URL.to_string(),
        user_agent: DEVICE_FLOW_USER_AGENT.to_string(),
    }
}
