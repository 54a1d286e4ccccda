use std::sync::Arc;

use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use opencompat_protocol::openai::request::ChatCompletionRequest;
use opencompat_provider_core::{ChatRequest, ProviderError, ProviderResult};
use opencompat_store::CredentialStore;

use crate::copilot::config::{
    CHAT_URL, COPILOT_INTEGRATION_ID, EDITOR_PLUGIN_VERSION, EDITOR_VERSION, PROVIDER_ID,
    TOKEN_URL, USER_AGENT_PRODUCT, USER_AGENT_VERSION,
};
use crate::http::{SharedClientKind, build_user_agent, shared_client};

/// Reuse margin for the short-lived API token.
const TOKEN_MARGIN_SECS: i64 = 60;

/// Short-lived API token obtained by exchanging the long-lived user token.
#[derive(Debug, Clone)]
struct ApiToken {
    token: String,
    expires_at: i64,
}

impl ApiToken {
    fn is_usable(&self) -> bool {
        OffsetDateTime::now_utc().unix_timestamp() + TOKEN_MARGIN_SECS < self.expires_at
    }
}

/// Upstream transport. The long-lived user token lives in the credential
/// store (in the `refresh_token` slot); the short-lived API token is cached
/// here behind a reader-writer lock with a double-checked exchange.
pub struct CopilotClient {
    pub(crate) store: Arc<CredentialStore>,
    token: RwLock<Option<ApiToken>>,
}

impl CopilotClient {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            token: RwLock::new(None),
        }
    }

    fn user_token(&self) -> ProviderResult<String> {
        let creds = self.store.get_oauth(PROVIDER_ID)?;
        if creds.refresh_token.is_empty() {
            return Err(ProviderError::Auth(format!(
                "no user token found - run 'opencompat login {PROVIDER_ID}' first"
            )));
        }
        Ok(creds.refresh_token)
    }

    /// Valid short-lived token, exchanging at most once across concurrent
    /// callers.
    pub async fn api_token(&self) -> ProviderResult<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.is_usable() {
                    return Ok(token.token.clone());
                }
            }
        }

        let mut cached = self.token.write().await;
        // Re-check: another task may have exchanged while we waited.
        if let Some(token) = cached.as_ref() {
            if token.is_usable() {
                return Ok(token.token.clone());
            }
        }

        let user_token = self.user_token()?;
        let token = self.exchange_token(&user_token).await?;
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn exchange_token(&self, user_token: &str) -> ProviderResult<ApiToken> {
        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
            #[serde(default)]
            expires_at: i64,
        }

        debug!("exchanging user token for api token");
        let client = shared_client(SharedClientKind::Control)?;
        let resp = client
            .get(TOKEN_URL)
            .header("Authorization", format!("token {user_token}"))
            .header("Accept", "application/json")
            .header("User-Agent", build_user_agent(USER_AGENT_PRODUCT, USER_AGENT_VERSION))
            .header("Editor-Version", EDITOR_VERSION)
            .header("Editor-Plugin-Version", EDITOR_PLUGIN_VERSION)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(format!("token exchange failed: {err}")))?;

        let status = resp.status().as_u16();
        let raw = resp
            .bytes()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        if status != 200 {
            return Err(ProviderError::Auth(format!(
                "token exchange failed with status {status}: {}",
                String::from_utf8_lossy(&raw)
            )));
        }

        let parsed: TokenResponse = serde_json::from_slice(&raw)
            .map_err(|err| ProviderError::Invalid(format!("bad token response: {err}")))?;
        Ok(ApiToken {
            token: parsed.token,
            expires_at: parsed.expires_at,
        })
    }

    pub async fn send_request(&self, req: &ChatRequest) -> ProviderResult<wreq::Response> {
        let token = self.api_token().await?;

        // Upstream speaks stock OpenAI; always stream and reduce later.
        let body = ChatCompletionRequest {
            model: req.model.clone(),
            messages: req.messages.clone(),
            tools: req.tools.clone(),
            tool_choice: req.tool_choice.clone(),
            stream: true,
            stream_options: req.stream_options,
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            max_completion_tokens: req.max_completion_tokens,
            stop: req.stop.clone(),
            ..Default::default()
        };
        let body = serde_json::to_vec(&body)
            .map_err(|err| ProviderError::Invalid(format!("failed to marshal request: {err}")))?;

        // `agent` when the conversation already carries assistant or tool
        // turns, `user` for a fresh prompt.
        let initiator = if req
            .messages
            .iter()
            .any(|msg| msg.role == "assistant" || msg.role == "tool")
        {
            "agent"
        } else {
            "user"
        };
        let has_vision = req.messages.iter().any(|msg| msg.has_image_content());

        let client = shared_client(SharedClientKind::Chat)?;
        let mut builder = client
            .post(CHAT_URL)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .header("User-Agent", build_user_agent(USER_AGENT_PRODUCT, USER_AGENT_VERSION))
            .header("Editor-Version", EDITOR_VERSION)
            .header("Editor-Plugin-Version", EDITOR_PLUGIN_VERSION)
            .header("Copilot-Integration-Id", COPILOT_INTEGRATION_ID)
            .header("Openai-Intent", "conversation-panel")
            .header("X-Initiator", initiator);
        if has_vision {
            builder = builder.header("Copilot-Vision-Request", "true");
        }

        builder
            .body(body)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(format!("failed to send request: {err}")))
    }
}
