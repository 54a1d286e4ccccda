use std::collections::BTreeMap;

use time::OffsetDateTime;
use tracing::debug;

use opencompat_protocol::openai::request::{
    FunctionCall, Message, MessageContent, ReasoningContent, ReasoningOutput, ToolCall,
};
use opencompat_protocol::openai::response::{
    ChatCompletionResponse, Choice, CompletionTokensDetails, PromptTokensDetails, Usage,
};
use opencompat_protocol::openai::stream::{ChatCompletionChunk, Delta};
use opencompat_protocol::sse::SseEvent;
use opencompat_provider_core::{ProviderError, ProviderResult};

use crate::chatgpt::events::{self, OutputItem, UsageData, WebSearchParams};

/// Per-request translation state: consumes upstream response events,
/// yields OpenAI chunks, and retains enough to synthesize the final
/// non-streaming response after EOF.
#[derive(Debug, Default)]
pub struct StreamState {
    response_id: String,
    model: String,
    created: i64,

    content: String,
    refusal: String,
    reasoning_summary: String,
    reasoning_full: String,

    tool_calls: BTreeMap<i64, ToolCall>,
    next_tool_index: i64,

    web_search_state: BTreeMap<String, WebSearchParams>,
    web_search_index: BTreeMap<String, i64>,

    finish_reason: String,
    usage: Option<Usage>,
    error_message: String,

    reasoning_compat: String,
    think_tag_open: bool,
    think_tag_closed: bool,
    pending_summary_newline: bool,
    saw_output: bool,
    sent_stop_chunk: bool,
}

impl StreamState {
    pub fn new(reasoning_compat: &str) -> Self {
        Self {
            reasoning_compat: reasoning_compat.to_string(),
            ..Default::default()
        }
    }

    /// Terminal failure reported by the upstream as an event.
    pub fn error(&self) -> Option<String> {
        if self.error_message.is_empty() {
            None
        } else {
            Some(self.error_message.clone())
        }
    }

    /// Translate one upstream event into zero or more chunks.
    pub fn process_event(&mut self, event: &SseEvent) -> ProviderResult<Vec<ChatCompletionChunk>> {
        let name = event.event.as_deref().unwrap_or("");
        match name {
            events::EVENT_RESPONSE_CREATED => {
                let data: events::ResponseEnvelope = self.parse(&event.data)?;
                self.response_id = data.response.id;
                self.model = data.response.model;
                self.created = OffsetDateTime::now_utc().unix_timestamp();

                Ok(vec![self.delta_chunk(Delta {
                    role: "assistant".to_string(),
                    ..Default::default()
                })])
            }

            events::EVENT_OUTPUT_TEXT_DELTA => {
                let data: events::TextDeltaData = self.parse(&event.data)?;
                let mut chunks = Vec::new();

                // First visible output closes an open think tag.
                if self.reasoning_compat == "think-tags"
                    && self.think_tag_open
                    && !self.think_tag_closed
                {
                    chunks.push(self.content_chunk("</think>"));
                    self.think_tag_open = false;
                    self.think_tag_closed = true;
                }

                self.saw_output = true;
                self.content.push_str(&data.delta);
                chunks.push(self.content_chunk(&data.delta));
                Ok(chunks)
            }

            events::EVENT_OUTPUT_TEXT_DONE => Ok(self.finish_chunks("stop")),

            events::EVENT_REASONING_SUMMARY_PART_ADDED => {
                if (self.reasoning_compat == "think-tags" || self.reasoning_compat == "o3")
                    && (!self.reasoning_summary.is_empty() || !self.reasoning_full.is_empty())
                {
                    self.pending_summary_newline = true;
                }
                Ok(Vec::new())
            }

            events::EVENT_REASONING_SUMMARY_TEXT_DELTA | events::EVENT_REASONING_TEXT_DELTA => {
                let data: events::TextDeltaData = self.parse(&event.data)?;
                let is_summary = name == events::EVENT_REASONING_SUMMARY_TEXT_DELTA;
                if is_summary {
                    self.reasoning_summary.push_str(&data.delta);
                } else {
                    self.reasoning_full.push_str(&data.delta);
                }
                Ok(self.reasoning_chunks(&data.delta, is_summary))
            }

            events::EVENT_FUNCTION_CALL_ARGUMENTS_DELTA => {
                let data: events::FunctionArgumentsDeltaData = self.parse(&event.data)?;
                let Some(call) = self.tool_calls.get_mut(&data.output_index) else {
                    // Registration happens on output_item.added; without it
                    // there is nothing to attach the delta to.
                    return Ok(Vec::new());
                };
                call.function.arguments.push_str(&data.delta);

                Ok(vec![self.tool_call_chunk(ToolCall {
                    index: Some(data.output_index),
                    id: String::new(),
                    r#type: String::new(),
                    function: FunctionCall {
                        name: String::new(),
                        arguments: data.delta,
                    },
                })])
            }

            events::EVENT_OUTPUT_ITEM_ADDED => {
                let data: events::OutputItemData = self.parse(&event.data)?;
                Ok(self.handle_output_item_added(data.output_index, &data.item))
            }

            events::EVENT_OUTPUT_ITEM_DONE => {
                let data: events::OutputItemData = self.parse(&event.data)?;
                Ok(self.handle_output_item_done(data.output_index, &data.item))
            }

            events::EVENT_WEB_SEARCH_SEARCHING
            | events::EVENT_WEB_SEARCH_IN_PROGRESS
            | events::EVENT_WEB_SEARCH_COMPLETED => {
                let data: events::WebSearchCallData = self.parse(&event.data)?;
                Ok(self.handle_web_search_progress(&data))
            }

            events::EVENT_CONTENT_PART_ADDED => {
                let data: events::ContentPartData = self.parse(&event.data)?;
                if data.part.r#type == "refusal" && !data.part.text.is_empty() {
                    self.refusal.push_str(&data.part.text);
                    return Ok(vec![self.delta_chunk(Delta {
                        refusal: Some(data.part.text),
                        ..Default::default()
                    })]);
                }
                Ok(Vec::new())
            }

            events::EVENT_RESPONSE_COMPLETED => {
                let data: events::ResponseEnvelope = self.parse(&event.data)?;
                let mut chunks = self.close_think_tag();

                let finish_reason = if self.tool_calls.is_empty() {
                    "stop"
                } else {
                    "tool_calls"
                };
                self.finish_reason = finish_reason.to_string();

                if let Some(usage) = &data.response.usage {
                    self.usage = Some(extract_usage(usage));
                }

                chunks.extend(self.finish_chunks(finish_reason));
                Ok(chunks)
            }

            events::EVENT_RESPONSE_INCOMPLETE => {
                let data: events::ResponseEnvelope = self.parse(&event.data)?;
                let mut chunks = self.close_think_tag();

                let finish_reason = match data.response.incomplete_reason.as_str() {
                    "content_filter" => "content_filter",
                    other => {
                        if !other.is_empty() && other != "max_output_tokens" {
                            debug!(reason = other, "unrecognized incomplete_reason, mapping to length");
                        }
                        "length"
                    }
                };
                self.finish_reason = finish_reason.to_string();

                if let Some(usage) = &data.response.usage {
                    self.usage = Some(extract_usage(usage));
                }

                chunks.extend(self.finish_chunks(finish_reason));
                Ok(chunks)
            }

            events::EVENT_RESPONSE_CANCELLED => Ok(self.finish_chunks("stop")),

            events::EVENT_RESPONSE_FAILED => {
                let data: events::ResponseEnvelope = self.parse(&event.data)?;
                self.finish_reason = "error".to_string();
                if let Some(error) = &data.response.error {
                    self.error_message = error.message.clone();
                }
                Ok(Vec::new())
            }

            events::EVENT_ERROR => {
                let data: events::ErrorEventData = self.parse(&event.data)?;
                self.finish_reason = "error".to_string();
                self.error_message = data.message;
                Ok(Vec::new())
            }

            events::EVENT_RESPONSE_IN_PROGRESS | events::EVENT_RESPONSE_QUEUED => Ok(Vec::new()),

            // Completion markers for already-streamed content.
            events::EVENT_CONTENT_PART_DONE
            | events::EVENT_REASONING_SUMMARY_PART_DONE
            | events::EVENT_REASONING_SUMMARY_TEXT_DONE
            | events::EVENT_REASONING_TEXT_DONE
            | events::EVENT_FUNCTION_CALL_ARGUMENTS_DONE => Ok(Vec::new()),

            // Server-side built-in tool progress, not exposed to clients.
            events::EVENT_FILE_SEARCH_SEARCHING
            | events::EVENT_FILE_SEARCH_IN_PROGRESS
            | events::EVENT_FILE_SEARCH_COMPLETED
            | events::EVENT_MCP_CALL_IN_PROGRESS
            | events::EVENT_MCP_CALL_COMPLETED
            | events::EVENT_MCP_CALL_FAILED
            | events::EVENT_MCP_CALL_ARGUMENTS_DELTA
            | events::EVENT_MCP_CALL_ARGUMENTS_DONE
            | events::EVENT_CODE_INTERPRETER_IN_PROGRESS
            | events::EVENT_CODE_INTERPRETER_INTERPRETING
            | events::EVENT_CODE_INTERPRETER_COMPLETED
            | events::EVENT_CODE_INTERPRETER_CODE_DELTA
            | events::EVENT_CODE_INTERPRETER_CODE_DONE
            | events::EVENT_IMAGE_GENERATION_IN_PROGRESS
            | events::EVENT_IMAGE_GENERATION_GENERATING
            | events::EVENT_IMAGE_GENERATION_PARTIAL_IMAGE
            | events::EVENT_IMAGE_GENERATION_COMPLETED => Ok(Vec::new()),

            other => {
                debug!(event = other, "unknown stream event ignored");
                Ok(Vec::new())
            }
        }
    }

    fn handle_output_item_added(
        &mut self,
        output_index: i64,
        item: &OutputItem,
    ) -> Vec<ChatCompletionChunk> {
        // Any *_call item registers as a client-visible function tool call.
        if !item.r#type.ends_with("_call") || item.r#type == "message" {
            return Vec::new();
        }

        let call_id = if item.call_id.is_empty() {
            item.id.clone()
        } else {
            item.call_id.clone()
        };
        let name = if item.name.is_empty() {
            item.r#type
                .strip_suffix("_call")
                .unwrap_or(&item.r#type)
                .to_string()
        } else {
            item.name.clone()
        };

        self.tool_calls.insert(
            output_index,
            ToolCall {
                index: None,
                id: call_id.clone(),
                r#type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: String::new(),
                },
            },
        );
        if output_index >= self.next_tool_index {
            self.next_tool_index = output_index + 1;
        }

        if item.r#type == "web_search_call" {
            self.web_search_index.insert(call_id.clone(), output_index);
            self.web_search_state.insert(call_id.clone(), WebSearchParams::default());
        }

        vec![self.tool_call_chunk(ToolCall {
            index: Some(output_index),
            id: call_id,
            r#type: "function".to_string(),
            function: FunctionCall {
                name,
                arguments: String::new(),
            },
        })]
    }

    fn handle_output_item_done(
        &mut self,
        output_index: i64,
        item: &OutputItem,
    ) -> Vec<ChatCompletionChunk> {
        if !item.r#type.ends_with("_call") || item.r#type == "message" {
            return Vec::new();
        }

        let call_id = if item.call_id.is_empty() {
            item.id.clone()
        } else {
            item.call_id.clone()
        };

        // function_call arguments were already streamed via delta events:
        // record the final value, never re-emit.
        if item.r#type == "function_call" {
            if !item.arguments.is_empty() {
                if let Some(call) = self.tool_calls.get_mut(&output_index) {
                    call.function.arguments = item.arguments.clone();
                }
            }
            return Vec::new();
        }

        // Other *_call kinds deliver their arguments here.
        let mut args_json = String::new();
        if !item.arguments.is_empty() {
            args_json = item.arguments.clone();
        } else if item.r#type == "web_search_call" {
            if let Some(params) = &item.parameters {
                args_json = serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string());
            } else {
                args_json = self.serialize_web_search_args(&call_id);
            }
        }

        let resolved_index = self
            .web_search_index
            .get(&call_id)
            .copied()
            .or_else(|| {
                self.tool_calls
                    .iter()
                    .find(|(_, call)| call.id == call_id)
                    .map(|(idx, _)| *idx)
            });

        let Some(index) = resolved_index else {
            debug!(call_id = %call_id, r#type = %item.r#type, "done event for untracked tool call");
            return Vec::new();
        };

        if args_json.is_empty() {
            args_json = "{}".to_string();
        }
        if let Some(call) = self.tool_calls.get_mut(&index) {
            call.function.arguments = args_json.clone();
        }

        vec![self.tool_call_chunk(ToolCall {
            index: Some(index),
            id: String::new(),
            r#type: String::new(),
            function: FunctionCall {
                name: String::new(),
                arguments: args_json,
            },
        })]
    }

    fn handle_web_search_progress(
        &mut self,
        data: &events::WebSearchCallData,
    ) -> Vec<ChatCompletionChunk> {
        let mut call_id = data.item_id.clone();
        if call_id.is_empty() {
            if let Some(item) = &data.item {
                call_id = if item.call_id.is_empty() {
                    item.id.clone()
                } else {
                    item.call_id.clone()
                };
            }
        }
        if call_id.is_empty() {
            return Vec::new();
        }

        self.merge_web_search_params(&call_id, data);

        let (index, first_chunk) = match self.web_search_index.get(&call_id) {
            Some(index) => (*index, false),
            None => {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                self.web_search_index.insert(call_id.clone(), index);
                self.tool_calls.entry(index).or_insert_with(|| ToolCall {
                    index: None,
                    id: call_id.clone(),
                    r#type: "function".to_string(),
                    function: FunctionCall {
                        name: "web_search".to_string(),
                        arguments: String::new(),
                    },
                });
                (index, true)
            }
        };

        let args_json = self.serialize_web_search_args(&call_id);
        if let Some(call) = self.tool_calls.get_mut(&index) {
            call.function.arguments = args_json.clone();
        }

        // Full metadata only on the first chunk for this call id. No
        // finish_reason here: other tool calls may still follow.
        let call = if first_chunk {
            ToolCall {
                index: Some(index),
                id: call_id,
                r#type: "function".to_string(),
                function: FunctionCall {
                    name: "web_search".to_string(),
                    arguments: args_json,
                },
            }
        } else {
            ToolCall {
                index: Some(index),
                id: String::new(),
                r#type: String::new(),
                function: FunctionCall {
                    name: String::new(),
                    arguments: args_json,
                },
            }
        };

        vec![self.tool_call_chunk(call)]
    }

    /// First-wins merge of web-search parameters from one progress event.
    fn merge_web_search_params(&mut self, call_id: &str, data: &events::WebSearchCallData) {
        let accum = self
            .web_search_state
            .entry(call_id.to_string())
            .or_default();

        if let Some(item) = &data.item {
            if !item.query.is_empty() && accum.query.is_empty() {
                accum.query = item.query.clone();
            }
            if let Some(params) = &item.parameters {
                merge_params(accum, params);
            }
        }
        if !data.query.is_empty() && accum.query.is_empty() {
            accum.query = data.query.clone();
        }
        if let Some(params) = &data.params {
            merge_params(accum, params);
        }
    }

    fn serialize_web_search_args(&self, call_id: &str) -> String {
        match self.web_search_state.get(call_id) {
            Some(params) => serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string()),
            None => "{}".to_string(),
        }
    }

    fn reasoning_chunks(&mut self, delta: &str, is_summary: bool) -> Vec<ChatCompletionChunk> {
        match self.reasoning_compat.as_str() {
            "think-tags" => {
                let mut chunks = Vec::new();
                if !self.think_tag_open && !self.think_tag_closed {
                    chunks.push(self.content_chunk("<think>"));
                    self.think_tag_open = true;
                }
                if self.think_tag_open && !self.think_tag_closed {
                    if self.pending_summary_newline {
                        chunks.push(self.content_chunk("\n"));
                        self.pending_summary_newline = false;
                    }
                    chunks.push(self.content_chunk(delta));
                }
                chunks
            }
            "o3" => {
                let mut chunks = Vec::new();
                if self.pending_summary_newline {
                    chunks.push(self.reasoning_delta_chunk("\n"));
                    self.pending_summary_newline = false;
                }
                chunks.push(self.reasoning_delta_chunk(delta));
                chunks
            }
            "legacy" => {
                // Only summary sub-events map to the legacy field.
                if !is_summary {
                    return Vec::new();
                }
                vec![self.delta_chunk(Delta {
                    reasoning_summary: delta.to_string(),
                    ..Default::default()
                })]
            }
            _ => Vec::new(),
        }
    }

    fn close_think_tag(&mut self) -> Vec<ChatCompletionChunk> {
        if self.reasoning_compat == "think-tags" && self.think_tag_open && !self.think_tag_closed {
            self.think_tag_open = false;
            self.think_tag_closed = true;
            return vec![self.content_chunk("</think>")];
        }
        Vec::new()
    }

    fn finish_chunks(&mut self, reason: &str) -> Vec<ChatCompletionChunk> {
        if self.sent_stop_chunk {
            return Vec::new();
        }
        self.sent_stop_chunk = true;
        if self.finish_reason.is_empty() {
            self.finish_reason = reason.to_string();
        }
        vec![ChatCompletionChunk::with_finish(
            &self.response_id,
            self.created,
            &self.model,
            reason,
        )]
    }

    fn delta_chunk(&self, delta: Delta) -> ChatCompletionChunk {
        ChatCompletionChunk::with_delta(&self.response_id, self.created, &self.model, delta)
    }

    fn content_chunk(&self, content: &str) -> ChatCompletionChunk {
        self.delta_chunk(Delta {
            content: Some(content.to_string()),
            ..Default::default()
        })
    }

    fn reasoning_delta_chunk(&self, text: &str) -> ChatCompletionChunk {
        self.delta_chunk(Delta {
            reasoning: Some(ReasoningOutput {
                content: vec![ReasoningContent {
                    r#type: "text".to_string(),
                    text: text.to_string(),
                }],
            }),
            ..Default::default()
        })
    }

    fn tool_call_chunk(&self, call: ToolCall) -> ChatCompletionChunk {
        self.delta_chunk(Delta {
            tool_calls: vec![call],
            ..Default::default()
        })
    }

    fn parse<T: serde::de::DeserializeOwned + Default>(&self, data: &str) -> ProviderResult<T> {
        events::parse_data(data)
            .map_err(|err| ProviderError::Invalid(format!("bad stream event payload: {err}")))
    }

    fn system_fingerprint(&self) -> String {
        if self.response_id.len() > 8 {
            format!("fp_{}", &self.response_id[self.response_id.len() - 8..])
        } else {
            String::new()
        }
    }

    /// Usage-only trailer for `stream_options.include_usage`; emitted after
    /// the terminal chunk with an empty choices array.
    pub fn usage_chunk(&self) -> Option<ChatCompletionChunk> {
        let usage = self.usage.clone()?;
        Some(ChatCompletionChunk {
            id: self.response_id.clone(),
            object: opencompat_protocol::openai::stream::CHUNK_OBJECT.to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: Vec::new(),
            usage: Some(usage),
            system_fingerprint: self.system_fingerprint(),
        })
    }

    /// Final projection of the accumulated state for non-streaming callers.
    pub fn build_response(&self) -> ChatCompletionResponse {
        let mut message = Message {
            role: "assistant".to_string(),
            ..Default::default()
        };

        let mut reasoning_text = self.reasoning_summary.clone();
        if !self.reasoning_full.is_empty() {
            if !reasoning_text.is_empty() {
                reasoning_text.push('\n');
            }
            reasoning_text.push_str(&self.reasoning_full);
        }

        let mut content = self.content.clone();
        match self.reasoning_compat.as_str() {
            "think-tags" => {
                if !reasoning_text.is_empty() {
                    content = format!("<think>{reasoning_text}</think>{content}");
                }
            }
            "o3" => {
                if !reasoning_text.is_empty() {
                    message.reasoning = Some(ReasoningOutput {
                        content: vec![ReasoningContent {
                            r#type: "text".to_string(),
                            text: reasoning_text,
                        }],
                    });
                }
            }
            "legacy" => {
                message.reasoning_summary = self.reasoning_summary.clone();
            }
            _ => {}
        }
        message.content = Some(MessageContent::Text(content));

        if !self.refusal.is_empty() {
            message.refusal = self.refusal.clone();
        }

        // BTreeMap iteration keeps tool calls ordered by output index; the
        // streaming index field is dropped for the final message.
        for call in self.tool_calls.values() {
            message.tool_calls.push(ToolCall {
                index: None,
                id: call.id.clone(),
                r#type: call.r#type.clone(),
                function: call.function.clone(),
            });
        }

        ChatCompletionResponse {
            id: self.response_id.clone(),
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: if self.finish_reason.is_empty() {
                    None
                } else {
                    Some(self.finish_reason.clone())
                },
            }],
            usage: self.usage.clone(),
            system_fingerprint: self.system_fingerprint(),
        }
    }
}

fn extract_usage(usage: &UsageData) -> Usage {
    let mut out = Usage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
        prompt_tokens_details: None,
        completion_tokens_details: None,
    };
    if let Some(details) = &usage.input_tokens_details {
        if details.cached_tokens > 0 {
            out.prompt_tokens_details = Some(PromptTokensDetails {
                cached_tokens: details.cached_tokens,
            });
        }
    }
    if let Some(details) = &usage.output_tokens_details {
        if details.reasoning_tokens > 0 {
            out.completion_tokens_details = Some(CompletionTokensDetails {
                reasoning_tokens: details.reasoning_tokens,
            });
        }
    }
    out
}

fn merge_params(accum: &mut WebSearchParams, params: &WebSearchParams) {
    if !params.query.is_empty() && accum.query.is_empty() {
        accum.query = params.query.clone();
    }
    if !params.domains.is_empty() && accum.domains.is_empty() {
        accum.domains = params.domains.clone();
    }
    if params.max_results > 0 && accum.max_results == 0 {
        accum.max_results = params.max_results;
    }
    if !params.recency.is_empty() && accum.recency.is_empty() {
        accum.recency = params.recency.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, data: serde_json::Value) -> SseEvent {
        SseEvent {
            event: Some(name.to_string()),
            data: data.to_string(),
            id: None,
            retry: None,
        }
    }

    fn run(state: &mut StreamState, steps: &[SseEvent]) -> Vec<ChatCompletionChunk> {
        let mut chunks = Vec::new();
        for step in steps {
            chunks.extend(state.process_event(step).expect("process"));
        }
        chunks
    }

    fn simple_completion_events() -> Vec<SseEvent> {
        vec![
            event(
                events::EVENT_RESPONSE_CREATED,
                serde_json::json!({"response": {"id": "r_1", "model": "gpt-5.1", "status": "in_progress"}}),
            ),
            event(
                events::EVENT_OUTPUT_TEXT_DELTA,
                serde_json::json!({"output_index": 0, "content_index": 0, "delta": "he"}),
            ),
            event(
                events::EVENT_OUTPUT_TEXT_DELTA,
                serde_json::json!({"output_index": 0, "content_index": 0, "delta": "llo"}),
            ),
            event(
                events::EVENT_RESPONSE_COMPLETED,
                serde_json::json!({"response": {"id": "r_1", "status": "completed",
                    "usage": {"input_tokens": 3, "output_tokens": 2, "total_tokens": 5}}}),
            ),
        ]
    }

    #[test]
    fn simple_text_stream_shape() {
        let mut state = StreamState::new("none");
        let chunks = run(&mut state, &simple_completion_events());

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].choices[0].delta.role, "assistant");
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("he"));
        assert_eq!(chunks[2].choices[0].delta.content.as_deref(), Some("llo"));
        assert_eq!(chunks[3].choices[0].finish_reason.as_deref(), Some("stop"));

        let response = state.build_response();
        assert_eq!(response.id, "r_1");
        assert_eq!(response.model, "gpt-5.1");
        assert_eq!(response.choices[0].message.content_text(), "hello");
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        let usage = response.usage.expect("usage");
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 5);
        // "r_1" is too short for a fingerprint.
        assert!(response.system_fingerprint.is_empty());
    }

    #[test]
    fn system_fingerprint_from_long_ids() {
        let mut state = StreamState::new("none");
        run(
            &mut state,
            &[event(
                events::EVENT_RESPONSE_CREATED,
                serde_json::json!({"response": {"id": "resp_0123456789abcdef", "model": "m"}}),
            )],
        );
        assert_eq!(state.build_response().system_fingerprint, "fp_89abcdef");
    }

    #[test]
    fn terminal_chunk_exactly_once() {
        let mut state = StreamState::new("none");
        let mut steps = simple_completion_events();
        // output_text.done fires before response.completed.
        steps.insert(
            3,
            event(
                events::EVENT_OUTPUT_TEXT_DONE,
                serde_json::json!({"output_index": 0, "content_index": 0, "text": "hello"}),
            ),
        );
        let chunks = run(&mut state, &steps);
        let finals: Vec<_> = chunks
            .iter()
            .filter(|chunk| {
                chunk
                    .choices
                    .first()
                    .map(|choice| choice.finish_reason.is_some())
                    .unwrap_or(false)
            })
            .collect();
        assert_eq!(finals.len(), 1);
    }

    #[test]
    fn usage_chunk_is_choiceless_trailer() {
        let mut state = StreamState::new("none");
        run(&mut state, &simple_completion_events());
        let trailer = state.usage_chunk().expect("usage chunk");
        assert!(trailer.choices.is_empty());
        assert_eq!(trailer.usage.expect("usage").total_tokens, 5);
    }

    #[test]
    fn tool_call_reconstruction_from_deltas() {
        let mut state = StreamState::new("none");
        let chunks = run(
            &mut state,
            &[
                event(
                    events::EVENT_RESPONSE_CREATED,
                    serde_json::json!({"response": {"id": "r_2", "model": "gpt-5.1-codex"}}),
                ),
                event(
                    events::EVENT_OUTPUT_ITEM_ADDED,
                    serde_json::json!({"output_index": 0, "item":
                        {"type": "function_call", "id": "c1", "call_id": "c1", "name": "sum"}}),
                ),
                event(
                    events::EVENT_FUNCTION_CALL_ARGUMENTS_DELTA,
                    serde_json::json!({"output_index": 0, "delta": "{\"a\":2"}),
                ),
                event(
                    events::EVENT_FUNCTION_CALL_ARGUMENTS_DELTA,
                    serde_json::json!({"output_index": 0, "delta": ",\"b\":2}"}),
                ),
                event(
                    events::EVENT_OUTPUT_ITEM_DONE,
                    serde_json::json!({"output_index": 0, "item":
                        {"type": "function_call", "id": "c1", "call_id": "c1", "name": "sum",
                         "arguments": "{\"a\":2,\"b\":2}"}}),
                ),
                event(
                    events::EVENT_RESPONSE_COMPLETED,
                    serde_json::json!({"response": {"id": "r_2", "status": "completed"}}),
                ),
            ],
        );

        // Registration chunk carries full metadata.
        let first_tool = &chunks[1].choices[0].delta.tool_calls[0];
        assert_eq!(first_tool.id, "c1");
        assert_eq!(first_tool.r#type, "function");
        assert_eq!(first_tool.function.name, "sum");
        assert_eq!(first_tool.index, Some(0));

        // No duplicate emission from output_item.done for function_call.
        let tool_chunks: Vec<_> = chunks
            .iter()
            .filter(|chunk| !chunk.choices.is_empty() && !chunk.choices[0].delta.tool_calls.is_empty())
            .collect();
        assert_eq!(tool_chunks.len(), 3);

        let response = state.build_response();
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("tool_calls"));
        let calls = &response.choices[0].message.tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].function.arguments, "{\"a\":2,\"b\":2}");
        assert!(calls[0].index.is_none());
    }

    #[test]
    fn non_function_call_done_emits_final_arguments() {
        let mut state = StreamState::new("none");
        let chunks = run(
            &mut state,
            &[
                event(
                    events::EVENT_OUTPUT_ITEM_ADDED,
                    serde_json::json!({"output_index": 1, "item":
                        {"type": "mcp_call", "id": "m1", "name": "lookup"}}),
                ),
                event(
                    events::EVENT_OUTPUT_ITEM_DONE,
                    serde_json::json!({"output_index": 1, "item":
                        {"type": "mcp_call", "id": "m1", "name": "lookup",
                         "arguments": "{\"q\":\"rust\"}"}}),
                ),
            ],
        );
        assert_eq!(chunks.len(), 2);
        let done = &chunks[1].choices[0].delta.tool_calls[0];
        assert_eq!(done.index, Some(1));
        assert_eq!(done.function.arguments, "{\"q\":\"rust\"}");
    }

    #[test]
    fn web_search_params_accumulate_first_wins() {
        let mut state = StreamState::new("none");
        let chunks = run(
            &mut state,
            &[
                event(
                    events::EVENT_WEB_SEARCH_IN_PROGRESS,
                    serde_json::json!({"item_id": "ws1", "parameters": {"query": "rust sse"}}),
                ),
                event(
                    events::EVENT_WEB_SEARCH_SEARCHING,
                    serde_json::json!({"item_id": "ws1",
                        "parameters": {"query": "OVERWRITTEN", "recency": "week"}}),
                ),
            ],
        );

        // First chunk carries metadata, second only index + args.
        let first = &chunks[0].choices[0].delta.tool_calls[0];
        assert_eq!(first.id, "ws1");
        assert_eq!(first.function.name, "web_search");
        let second = &chunks[1].choices[0].delta.tool_calls[0];
        assert!(second.id.is_empty());
        assert_eq!(second.index, first.index);

        // query was set first and never overwritten; recency merged in.
        let args: serde_json::Value =
            serde_json::from_str(&second.function.arguments).expect("args json");
        assert_eq!(args["query"], "rust sse");
        assert_eq!(args["recency"], "week");

        // No finish_reason from progress events.
        assert!(chunks.iter().all(|chunk| chunk.choices[0].finish_reason.is_none()));
    }

    #[test]
    fn think_tags_open_and_close_exactly_once() {
        let mut state = StreamState::new("think-tags");
        let chunks = run(
            &mut state,
            &[
                event(
                    events::EVENT_RESPONSE_CREATED,
                    serde_json::json!({"response": {"id": "r_3", "model": "gpt-5.1"}}),
                ),
                event(
                    events::EVENT_REASONING_SUMMARY_TEXT_DELTA,
                    serde_json::json!({"delta": "think1"}),
                ),
                event(events::EVENT_REASONING_SUMMARY_PART_ADDED, serde_json::json!({})),
                event(
                    events::EVENT_REASONING_SUMMARY_TEXT_DELTA,
                    serde_json::json!({"delta": "think2"}),
                ),
                event(
                    events::EVENT_OUTPUT_TEXT_DELTA,
                    serde_json::json!({"delta": "answer"}),
                ),
                event(
                    events::EVENT_RESPONSE_COMPLETED,
                    serde_json::json!({"response": {"id": "r_3"}}),
                ),
            ],
        );

        let text: String = chunks
            .iter()
            .filter_map(|chunk| chunk.choices.first())
            .filter_map(|choice| choice.delta.content.clone())
            .collect();
        assert_eq!(text, "<think>think1\nthink2</think>answer");
        assert_eq!(text.matches("<think>").count(), 1);
        assert_eq!(text.matches("</think>").count(), 1);
        // All content after </think> is non-reasoning output.
        let close = text.find("</think>").expect("close tag");
        assert_eq!(&text[close + "</think>".len()..], "answer");

        let response = state.build_response();
        assert_eq!(
            response.choices[0].message.content_text(),
            "<think>think1\nthink2</think>answer"
        );
    }

    #[test]
    fn o3_mode_emits_reasoning_deltas() {
        let mut state = StreamState::new("o3");
        let chunks = run(
            &mut state,
            &[
                event(
                    events::EVENT_REASONING_TEXT_DELTA,
                    serde_json::json!({"delta": "step"}),
                ),
            ],
        );
        let reasoning = chunks[0].choices[0].delta.reasoning.as_ref().expect("reasoning");
        assert_eq!(reasoning.content[0].text, "step");

        let response = state.build_response();
        let reasoning = response.choices[0].message.reasoning.as_ref().expect("reasoning");
        assert_eq!(reasoning.content[0].text, "step");
    }

    #[test]
    fn legacy_mode_only_maps_summary_events() {
        let mut state = StreamState::new("legacy");
        let chunks = run(
            &mut state,
            &[
                event(
                    events::EVENT_REASONING_SUMMARY_TEXT_DELTA,
                    serde_json::json!({"delta": "sum"}),
                ),
                event(
                    events::EVENT_REASONING_TEXT_DELTA,
                    serde_json::json!({"delta": "full"}),
                ),
            ],
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].choices[0].delta.reasoning_summary, "sum");
    }

    #[test]
    fn none_mode_suppresses_reasoning() {
        let mut state = StreamState::new("none");
        let chunks = run(
            &mut state,
            &[event(
                events::EVENT_REASONING_SUMMARY_TEXT_DELTA,
                serde_json::json!({"delta": "hidden"}),
            )],
        );
        assert!(chunks.is_empty());
    }

    #[test]
    fn incomplete_maps_reasons() {
        let mut state = StreamState::new("none");
        let chunks = run(
            &mut state,
            &[event(
                events::EVENT_RESPONSE_INCOMPLETE,
                serde_json::json!({"response": {"id": "r", "incomplete_reason": "content_filter"}}),
            )],
        );
        assert_eq!(chunks[0].choices[0].finish_reason.as_deref(), Some("content_filter"));

        let mut state = StreamState::new("none");
        let chunks = run(
            &mut state,
            &[event(
                events::EVENT_RESPONSE_INCOMPLETE,
                serde_json::json!({"response": {"id": "r", "incomplete_reason": "mystery_reason"}}),
            )],
        );
        assert_eq!(chunks[0].choices[0].finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn failed_and_error_capture_message_without_chunks() {
        let mut state = StreamState::new("none");
        let chunks = run(
            &mut state,
            &[event(
                events::EVENT_RESPONSE_FAILED,
                serde_json::json!({"response": {"id": "r", "error": {"message": "boom"}}}),
            )],
        );
        assert!(chunks.is_empty());
        assert_eq!(state.error().as_deref(), Some("boom"));

        let mut state = StreamState::new("none");
        let chunks = run(
            &mut state,
            &[event(events::EVENT_ERROR, serde_json::json!({"message": "bad"}))],
        );
        assert!(chunks.is_empty());
        assert_eq!(state.error().as_deref(), Some("bad"));
    }

    #[test]
    fn refusal_content_part_is_forwarded() {
        let mut state = StreamState::new("none");
        let chunks = run(
            &mut state,
            &[event(
                events::EVENT_CONTENT_PART_ADDED,
                serde_json::json!({"part": {"type": "refusal", "text": "cannot"}}),
            )],
        );
        assert_eq!(chunks[0].choices[0].delta.refusal.as_deref(), Some("cannot"));
        let response = state.build_response();
        assert_eq!(response.choices[0].message.refusal, "cannot");
    }

    #[test]
    fn unknown_events_are_ignored() {
        let mut state = StreamState::new("none");
        let chunks = run(
            &mut state,
            &[event("response.future_feature.delta", serde_json::json!({}))],
        );
        assert!(chunks.is_empty());
    }
}
