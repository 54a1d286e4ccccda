use std::sync::{Arc, OnceLock};

use opencompat_provider_core::{ProviderError, ProviderResult};
use opencompat_store::CredentialStore;

use crate::chatgpt::config::{self, CODEX_VERSION, ORIGINATOR, RESPONSES_URL};
use crate::chatgpt::transform::ResponsesRequest;
use crate::http::{SharedClientKind, build_user_agent, shared_client};

static USER_AGENT: OnceLock<String> = OnceLock::new();

fn user_agent() -> &'static str {
    USER_AGENT.get_or_init(|| build_user_agent(ORIGINATOR, CODEX_VERSION))
}

/// Upstream transport for the responses endpoint. Credentials come from the
/// store and auto-refresh behind its per-provider lock.
pub struct ChatGptClient {
    store: Arc<CredentialStore>,
}

impl ChatGptClient {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    pub async fn send_request(&self, req: &ResponsesRequest) -> ProviderResult<wreq::Response> {
        let creds = self
            .store
            .get_oauth_refreshed(config::PROVIDER_ID, &config::oauth_config())
            .await?;

        let body = serde_json::to_vec(req)
            .map_err(|err| ProviderError::Invalid(format!("failed to marshal request: {err}")))?;

        let client = shared_client(SharedClientKind::Chat)?;
        let mut builder = client
            .post(RESPONSES_URL)
            .header("Authorization", format!("Bearer {}", creds.access_token))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .header("User-Agent", user_agent())
            .header("OpenAI-Beta", "responses=experimental")
            .header("originator", ORIGINATOR);

        if !creds.account_id.is_empty() {
            builder = builder.header("ChatGPT-Account-ID", &creds.account_id);
        }
        if !req.prompt_cache_key.is_empty() {
            builder = builder
                .header("session_id", &req.prompt_cache_key)
                .header("conversation_id", &req.prompt_cache_key);
        }

        builder
            .body(body)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))
    }
}
