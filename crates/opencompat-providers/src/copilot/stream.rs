use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use opencompat_protocol::openai::request::{FunctionCall, Message, MessageContent, ToolCall};
use opencompat_protocol::openai::response::{ChatCompletionResponse, Choice};
use opencompat_protocol::openai::stream::{CHUNK_OBJECT, ChatCompletionChunk};
use opencompat_protocol::sse::SseReader;
use opencompat_provider_core::{ChatStream, ProviderError, ProviderResult};

type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, wreq::Error>> + Send>>;

/// Passthrough for an upstream that already speaks OpenAI SSE: chunks are
/// forwarded unchanged while a reduction accumulates the non-streaming view.
pub struct CopilotStream {
    reader: SseReader<BodyStream>,
    stream: bool,
    include_usage: bool,
    done: bool,
    sent_usage: bool,
    last_usage_chunk: Option<ChatCompletionChunk>,
    response: Option<ChatCompletionResponse>,
}

impl CopilotStream {
    pub fn new(resp: wreq::Response, stream: bool, include_usage: bool) -> Self {
        let body: BodyStream = Box::pin(resp.bytes_stream());
        Self {
            reader: SseReader::new(body),
            stream,
            include_usage,
            done: false,
            sent_usage: false,
            last_usage_chunk: None,
            response: None,
        }
    }

    fn accumulate(&mut self, chunk: &ChatCompletionChunk) {
        let response = self.response.get_or_insert_with(|| ChatCompletionResponse {
            id: chunk.id.clone(),
            object: "chat.completion".to_string(),
            created: chunk.created,
            model: chunk.model.clone(),
            system_fingerprint: chunk.system_fingerprint.clone(),
            choices: Vec::new(),
            usage: None,
        });

        for incoming in &chunk.choices {
            while response.choices.len() <= incoming.index as usize {
                response.choices.push(Choice {
                    index: response.choices.len() as i64,
                    message: Message {
                        role: "assistant".to_string(),
                        ..Default::default()
                    },
                    finish_reason: None,
                });
            }
            let choice = &mut response.choices[incoming.index as usize];
            let message = &mut choice.message;

            if !incoming.delta.role.is_empty() {
                message.role = incoming.delta.role.clone();
            }
            if let Some(content) = &incoming.delta.content {
                let existing = message.content_text();
                message.content = Some(MessageContent::Text(existing + content));
            }
            for tool_delta in &incoming.delta.tool_calls {
                let index = tool_delta.index.unwrap_or(0) as usize;
                while message.tool_calls.len() <= index {
                    message.tool_calls.push(ToolCall {
                        index: None,
                        id: String::new(),
                        r#type: "function".to_string(),
                        function: FunctionCall::default(),
                    });
                }
                let call = &mut message.tool_calls[index];
                if !tool_delta.id.is_empty() {
                    call.id = tool_delta.id.clone();
                }
                if !tool_delta.function.name.is_empty() {
                    call.function.name = tool_delta.function.name.clone();
                }
                call.function
                    .arguments
                    .push_str(&tool_delta.function.arguments);
            }
            if incoming.finish_reason.is_some() {
                choice.finish_reason = incoming.finish_reason.clone();
            }
        }

        if chunk.usage.is_some() {
            response.usage = chunk.usage.clone();
        }
    }
}

#[async_trait]
impl ChatStream for CopilotStream {
    async fn next_chunk(&mut self) -> ProviderResult<Option<ChatCompletionChunk>> {
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
                // Trailing usage-only chunk when the client asked for it.
                if self.include_usage && !self.sent_usage {
                    if let Some(last) = &self.last_usage_chunk {
                        self.sent_usage = true;
                        return Ok(Some(ChatCompletionChunk {
                            id: last.id.clone(),
                            object: CHUNK_OBJECT.to_string(),
                            created: last.created,
                            model: last.model.clone(),
                            choices: Vec::new(),
                            usage: last.usage.clone(),
                            system_fingerprint: String::new(),
                        }));
                    }
                }
                return Ok(None);
            };

            if event.data.is_empty() {
                continue;
            }
            // Malformed frames are skipped, not fatal.
            let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
                continue;
            };

            if chunk.usage.is_some() {
                self.last_usage_chunk = Some(chunk.clone());
            }
            if !self.stream {
                self.accumulate(&chunk);
            }
            return Ok(Some(chunk));
        }
    }

    fn response(&mut self) -> Option<ChatCompletionResponse> {
        self.response.take()
    }

    fn stream_error(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencompat_protocol::openai::response::Usage;
    use opencompat_protocol::openai::stream::{ChunkChoice, Delta};

    fn chunk_json(chunk: &ChatCompletionChunk) -> String {
        serde_json::to_string(chunk).expect("chunk json")
    }

    fn content_chunk(content: &str, finish: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "cmpl-1".to_string(),
            object: CHUNK_OBJECT.to_string(),
            created: 123,
            model: "gpt-4o".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    content: Some(content.to_string()),
                    ..Default::default()
                },
                finish_reason: finish.map(|reason| reason.to_string()),
            }],
            usage: None,
            system_fingerprint: String::new(),
        }
    }

    fn stream_from_frames(frames: &[String], stream: bool, include_usage: bool) -> CopilotStream {
        let mut body = String::new();
        for frame in frames {
            body.push_str(&format!("data: {frame}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");

        let chunks: Vec<Result<Bytes, wreq::Error>> = vec![Ok(Bytes::from(body))];
        CopilotStream {
            reader: SseReader::new(Box::pin(futures_util::stream::iter(chunks))),
            stream,
            include_usage,
            done: false,
            sent_usage: false,
            last_usage_chunk: None,
            response: None,
        }
    }

    #[tokio::test]
    async fn forwards_chunks_unchanged_and_reduces() {
        let mut usage_chunk = content_chunk("", Some("stop"));
        usage_chunk.usage = Some(Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
            ..Default::default()
        });

        let frames = vec![
            chunk_json(&content_chunk("hel", None)),
            chunk_json(&content_chunk("lo", None)),
            chunk_json(&usage_chunk),
        ];
        let mut stream = stream_from_frames(&frames, false, false);

        let mut forwarded = Vec::new();
        while let Some(chunk) = stream.next_chunk().await.expect("next") {
            forwarded.push(chunk);
        }
        assert_eq!(forwarded.len(), 3);
        assert_eq!(forwarded[0].choices[0].delta.content.as_deref(), Some("hel"));

        let response = stream.response().expect("reduced response");
        assert_eq!(response.choices[0].message.content_text(), "hello");
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.expect("usage").total_tokens, 3);
    }

    #[tokio::test]
    async fn trailing_usage_chunk_when_requested() {
        let mut usage_chunk = content_chunk("x", Some("stop"));
        usage_chunk.usage = Some(Usage {
            prompt_tokens: 5,
            completion_tokens: 1,
            total_tokens: 6,
            ..Default::default()
        });

        let frames = vec![chunk_json(&usage_chunk)];
        let mut stream = stream_from_frames(&frames, true, true);

        let first = stream.next_chunk().await.expect("next").expect("chunk");
        assert!(!first.choices.is_empty());

        let trailer = stream.next_chunk().await.expect("next").expect("usage trailer");
        assert!(trailer.choices.is_empty());
        assert_eq!(trailer.usage.expect("usage").total_tokens, 6);

        assert!(stream.next_chunk().await.expect("next").is_none());
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let frames = vec!["{not json".to_string(), chunk_json(&content_chunk("ok", None))];
        let mut stream = stream_from_frames(&frames, true, false);
        let chunk = stream.next_chunk().await.expect("next").expect("chunk");
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn tool_calls_assemble_by_index() {
        let tool_first = ChatCompletionChunk {
            id: "cmpl-2".to_string(),
            object: CHUNK_OBJECT.to_string(),
            created: 1,
            model: "gpt-4o".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    tool_calls: vec![ToolCall {
                        index: Some(0),
                        id: "call_1".to_string(),
                        r#type: "function".to_string(),
                        function: FunctionCall {
                            name: "sum".to_string(),
                            arguments: "{\"a\":".to_string(),
                        },
                    }],
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
            system_fingerprint: String::new(),
        };
        let mut tool_rest = tool_first.clone();
        tool_rest.choices[0].delta.tool_calls[0] = ToolCall {
            index: Some(0),
            id: String::new(),
            r#type: String::new(),
            function: FunctionCall {
                name: String::new(),
                arguments: "1}".to_string(),
            },
        };
        let mut finish = tool_first.clone();
        finish.choices[0].delta = Delta::default();
        finish.choices[0].finish_reason = Some("tool_calls".to_string());

        let frames = vec![chunk_json(&tool_first), chunk_json(&tool_rest), chunk_json(&finish)];
        let mut stream = stream_from_frames(&frames, false, false);
        while stream.next_chunk().await.expect("next").is_some() {}

        let response = stream.response().expect("response");
        let calls = &response.choices[0].message.tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "sum");
        assert_eq!(calls[0].function.arguments, "{\"a\":1}");
    }
}
