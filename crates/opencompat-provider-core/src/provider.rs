use async_trait::async_trait;
use serde_json::Value as JsonValue;

use opencompat_protocol::openai::request::{Message, StreamOptions, Tool};
use opencompat_protocol::openai::response::{ChatCompletionResponse, Model};
use opencompat_protocol::openai::stream::ChatCompletionChunk;

use crate::errors::ProviderResult;

/// Provider-facing chat request, already validated and stripped of the
/// provider prefix by the front door.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub tool_choice: Option<JsonValue>,
    pub parallel_tool_calls: Option<bool>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub n: Option<i64>,
    /// String or array of strings; forwarded opaquely.
    pub stop: Option<JsonValue>,
    pub max_tokens: Option<i64>,
    pub max_completion_tokens: Option<i64>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub logit_bias: Option<std::collections::BTreeMap<String, i32>>,
    pub seed: Option<i64>,
    pub response_format: Option<opencompat_protocol::openai::request::ResponseFormat>,
    pub stream: bool,
    pub stream_options: Option<StreamOptions>,
    pub reasoning_effort: String,
    /// `X-Reasoning-Summary` override.
    pub reasoning_summary: String,
    /// `X-Reasoning-Compat` override.
    pub reasoning_compat: String,
    /// `X-Text-Verbosity` override.
    pub text_verbosity: String,
}

impl ChatRequest {
    pub fn include_usage(&self) -> bool {
        self.stream_options.map(|opts| opts.include_usage).unwrap_or(false)
    }
}

/// One in-flight upstream response, consumed chunk by chunk.
///
/// `next_chunk` yields `Ok(None)` at end of stream. After that,
/// [`ChatStream::response`] holds the synthesized non-streaming response and
/// [`ChatStream::stream_error`] any terminal upstream failure that arrived as
/// an event rather than a transport error.
#[async_trait]
pub trait ChatStream: Send {
    async fn next_chunk(&mut self) -> ProviderResult<Option<ChatCompletionChunk>>;

    fn response(&mut self) -> Option<ChatCompletionResponse>;

    fn stream_error(&self) -> Option<String>;
}

/// An upstream chat backend.
///
/// Lifecycle hooks (`init`, `start`, `close`) and `refresh_models` are
/// optional capabilities with no-op defaults; the registry invokes them
/// unconditionally.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &'static str;

    /// Async because some providers serve their list from a cache that may
    /// need an upstream fetch.
    async fn models(&self) -> Vec<Model>;

    /// `model_id` comes without the provider prefix; providers may apply
    /// their own alias and suffix handling.
    async fn supports_model(&self, model_id: &str) -> bool;

    async fn chat_completion(&self, req: ChatRequest) -> ProviderResult<Box<dyn ChatStream>>;

    /// Synchronous startup work; the server refuses to start when it fails.
    async fn init(&self) -> ProviderResult<()> {
        Ok(())
    }

    /// Launch background tasks once `init` has succeeded.
    fn start(&self) {}

    /// Stop background tasks and wait for them to confirm.
    async fn close(&self) {}

    /// Force-refresh provider data (models, instructions).
    async fn refresh_models(&self) -> ProviderResult<()> {
        Ok(())
    }
}
