use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use opencompat_protocol::openai::error::parse_upstream_error;
use opencompat_protocol::openai::response::{ChatCompletionResponse, Model};
use opencompat_protocol::openai::stream::ChatCompletionChunk;
use opencompat_protocol::sse::SseReader;
use opencompat_provider_core::{
    ChatRequest, ChatStream, Provider, ProviderError, ProviderMeta, ProviderResult,
};
use opencompat_store::{AuthMethod, CredentialStore, paths};

pub mod client;
pub mod config;
pub mod events;
pub mod instructions;
pub mod jwt;
pub mod models;
pub mod stream;
pub mod transform;

use client::ChatGptClient;
use config::Config;
use instructions::InstructionsCache;
use stream::StreamState;

pub fn meta() -> ProviderMeta {
    ProviderMeta {
        id: config::PROVIDER_ID,
        display_name: "ChatGPT",
        auth_method: AuthMethod::OAuth,
        oauth_cfg: Some(config::oauth_config()),
        device_cfg: None,
        env_vars: vec![opencompat_provider_core::EnvVarDoc {
            name: config::ENV_INSTRUCTIONS_REFRESH,
            description: "Instructions refresh interval in minutes",
            default: config::DEFAULT_INSTRUCTIONS_REFRESH_MINS.to_string(),
        }],
        factory: new_provider,
    }
}

fn new_provider(store: Arc<CredentialStore>) -> ProviderResult<Arc<dyn Provider>> {
    let cfg = Config::from_env();
    let instructions = Arc::new(InstructionsCache::new(
        paths::cache_dir(),
        Duration::from_secs(cfg.instructions_refresh_mins * 60),
    ));
    Ok(Arc::new(ChatGptProvider {
        client: ChatGptClient::new(store),
        instructions,
        cfg,
    }))
}

pub struct ChatGptProvider {
    client: ChatGptClient,
    instructions: Arc<InstructionsCache>,
    cfg: Config,
}

#[async_trait]
impl Provider for ChatGptProvider {
    fn id(&self) -> &'static str {
        config::PROVIDER_ID
    }

    async fn models(&self) -> Vec<Model> {
        models::supported_models()
    }

    async fn supports_model(&self, model_id: &str) -> bool {
        models::is_supported(model_id)
    }

    async fn chat_completion(&self, req: ChatRequest) -> ProviderResult<Box<dyn ChatStream>> {
        let (normalized_model, _) = models::normalize_model_with_effort(&req.model);
        let instructions = self.instructions.clone().get(&normalized_model).await?;

        let cfg = self.cfg.with_overrides(
            &req.reasoning_summary,
            &req.reasoning_compat,
            &req.text_verbosity,
        );
        let upstream_req = transform::transform_request(&req, &instructions, &cfg);

        let resp = self.client.send_request(&upstream_req).await?;
        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(ProviderError::upstream(status, parse_upstream_error(&body)));
        }

        let include_usage = req.include_usage();
        Ok(Box::new(ChatGptStream::new(
            resp,
            StreamState::new(&cfg.reasoning_compat),
            include_usage,
        )))
    }

    /// The server refuses traffic until the prompt files are available.
    async fn init(&self) -> ProviderResult<()> {
        self.instructions.prefetch().await
    }

    fn start(&self) {
        self.instructions.clone().start_background_refresh(Duration::from_secs(
            self.cfg.instructions_refresh_mins * 60,
        ));
    }

    async fn close(&self) {
        self.instructions.close().await;
    }

    /// Models are static here; a forced refresh re-fetches instructions.
    async fn refresh_models(&self) -> ProviderResult<()> {
        self.instructions.refresh_all().await
    }
}

type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, wreq::Error>> + Send>>;

/// Drives the upstream SSE body through the translation state.
pub struct ChatGptStream {
    reader: SseReader<BodyStream>,
    state: StreamState,
    include_usage: bool,
    pending: VecDeque<ChatCompletionChunk>,
    response: Option<ChatCompletionResponse>,
    done: bool,
    sent_usage: bool,
}

impl ChatGptStream {
    fn new(resp: wreq::Response, state: StreamState, include_usage: bool) -> Self {
        let body: BodyStream = Box::pin(resp.bytes_stream());
        Self {
            reader: SseReader::new(body),
            state,
            include_usage,
            pending: VecDeque::new(),
            response: None,
            done: false,
            sent_usage: false,
        }
    }
}

#[async_trait]
impl ChatStream for ChatGptStream {
    async fn next_chunk(&mut self) -> ProviderResult<Option<ChatCompletionChunk>> {
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Some(chunk));
        }
        if self.done {
            return Ok(None);
        }

        loop {
            let event = self
                .reader
                .next_event()
                .await
                .map_err(|err| ProviderError::Transport(err.to_string()))?;

            let Some(event) = event else {
                self.done = true;
                self.response = Some(self.state.build_response());
                if self.include_usage && !self.sent_usage {
                    self.sent_usage = true;
                    if let Some(usage_chunk) = self.state.usage_chunk() {
                        return Ok(Some(usage_chunk));
                    }
                }
                return Ok(None);
            };

            let mut chunks = self.state.process_event(&event)?.into_iter();
            if let Some(first) = chunks.next() {
                self.pending.extend(chunks);
                return Ok(Some(first));
            }
        }
    }

    fn response(&mut self) -> Option<ChatCompletionResponse> {
        self.response.take()
    }

    fn stream_error(&self) -> Option<String> {
        self.state.error()
    }
}
