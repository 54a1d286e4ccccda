use serde::{Deserialize, Serialize};

use crate::openai::request::{ReasoningOutput, ToolCall};
use crate::openai::response::Usage;

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";

/// Streaming chat completion chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_fingerprint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: i64,
    pub delta: Delta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOutput>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_summary: String,
}

impl ChatCompletionChunk {
    /// Chunk skeleton carrying stream identity and one choice delta.
    pub fn with_delta(id: &str, created: i64, model: &str, delta: Delta) -> Self {
        Self {
            id: id.to_string(),
            object: CHUNK_OBJECT.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
            system_fingerprint: String::new(),
        }
    }

    pub fn with_finish(id: &str, created: i64, model: &str, reason: &str) -> Self {
        Self {
            id: id.to_string(),
            object: CHUNK_OBJECT.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta::default(),
                finish_reason: Some(reason.to_string()),
            }],
            usage: None,
            system_fingerprint: String::new(),
        }
    }
}
