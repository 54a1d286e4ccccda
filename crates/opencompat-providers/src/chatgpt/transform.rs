use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::warn;

use opencompat_protocol::openai::request::Message;
use opencompat_provider_core::ChatRequest;

use crate::chatgpt::config::Config;
use crate::chatgpt::models;

/// Request body for the upstream responses endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    pub store: bool,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<&'static str>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prompt_cache_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<JsonValue>,
}

/// One entry of the upstream `input` array. The upstream schema varies by
/// `type`; unset fields stay off the wire.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InputItem {
    pub r#type: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<JsonValue>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub call_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub arguments: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentBlock {
    pub r#type: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub r#type: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub effort: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub verbosity: String,
}

/// Convert an OpenAI chat completion request into the upstream responses
/// shape. Always streams; the caller synthesizes non-streaming output.
pub fn transform_request(req: &ChatRequest, instructions: &str, cfg: &Config) -> ResponsesRequest {
    let (model, model_effort) = models::normalize_model_with_effort(&req.model);

    let input = transform_messages(&req.messages);

    let tools: Vec<ToolDef> = req
        .tools
        .iter()
        .filter(|tool| tool.r#type == "function")
        .map(|tool| ToolDef {
            r#type: "function",
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            parameters: tool.function.parameters.clone(),
            strict: tool.function.strict,
        })
        .collect();

    // Effort priority: model-name suffix, then request field, then default.
    let mut effort = cfg.reasoning_effort.clone();
    if !req.reasoning_effort.is_empty() {
        effort = req.reasoning_effort.clone();
    }
    if !model_effort.is_empty() {
        effort = model_effort;
    }
    let effort = models::normalize_reasoning_effort(&model, &effort);

    log_unsupported_params(req);

    let mut out = ResponsesRequest {
        model: model.clone(),
        instructions: instructions.to_string(),
        input,
        tools,
        tool_choice: req.tool_choice.clone(),
        parallel_tool_calls: req.parallel_tool_calls,
        store: false,
        stream: true,
        reasoning: Some(ReasoningConfig {
            effort,
            summary: cfg.reasoning_summary.clone(),
        }),
        text: Some(TextConfig {
            verbosity: cfg.text_verbosity.clone(),
        }),
        include: vec!["reasoning.encrypted_content"],
        prompt_cache_key: prompt_cache_key(instructions, &model),
        temperature: req.temperature,
        top_p: req.top_p,
        max_output_tokens: None,
        stop: None,
    };

    // max_completion_tokens is the current name; max_tokens is legacy.
    if req.max_completion_tokens.is_some() {
        out.max_output_tokens = req.max_completion_tokens;
    } else if req.max_tokens.is_some() {
        out.max_output_tokens = req.max_tokens;
    }

    if let Some(stop) = &req.stop {
        let empty_list = stop.as_array().map(|list| list.is_empty()).unwrap_or(false);
        if !stop.is_null() && !empty_list {
            out.stop = Some(stop.clone());
        }
    }

    out
}

/// 16-hex-char SHA-256 prefix of (instructions ‖ model), sent as the
/// upstream prompt cache key and session id.
pub fn prompt_cache_key(instructions: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(instructions.as_bytes());
    hasher.update(model.as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn log_unsupported_params(req: &ChatRequest) {
    if let Some(n) = req.n {
        if n > 1 {
            warn!(param = "n", value = n, "parameter not supported upstream, ignored");
        }
    }
    if let Some(value) = req.presence_penalty {
        if value != 0.0 {
            warn!(param = "presence_penalty", value, "parameter not supported upstream, ignored");
        }
    }
    if let Some(value) = req.frequency_penalty {
        if value != 0.0 {
            warn!(param = "frequency_penalty", value, "parameter not supported upstream, ignored");
        }
    }
    if req.logit_bias.as_ref().map(|m| !m.is_empty()).unwrap_or(false) {
        warn!(param = "logit_bias", "parameter not supported upstream, ignored");
    }
    if let Some(seed) = req.seed {
        warn!(param = "seed", value = seed, "parameter not supported upstream, ignored");
    }
    if let Some(format) = &req.response_format {
        warn!(
            param = "response_format",
            r#type = %format.r#type,
            "parameter not supported upstream, ignored"
        );
    }
}

fn transform_messages(messages: &[Message]) -> Vec<InputItem> {
    let mut input = Vec::new();

    // Upstream has no system role: fold every system message into one
    // synthetic user message at the front of the conversation.
    let mut system_content = String::new();
    for msg in messages.iter().filter(|msg| msg.role == "system") {
        let content = msg.content_text();
        if content.is_empty() {
            continue;
        }
        if !system_content.is_empty() {
            system_content.push('\n');
        }
        system_content.push_str(&content);
    }
    if !system_content.is_empty() {
        input.push(InputItem {
            r#type: "message",
            role: "user".to_string(),
            content: Some(JsonValue::String(system_content)),
            ..Default::default()
        });
    }

    for msg in messages.iter().filter(|msg| msg.role != "system") {
        // Tool results become function_call_output items without a role.
        if msg.role == "tool" {
            input.push(InputItem {
                r#type: "function_call_output",
                call_id: msg.tool_call_id.clone(),
                output: msg.content_text(),
                ..Default::default()
            });
            continue;
        }

        if msg.role == "assistant" && !msg.tool_calls.is_empty() {
            if let Some(content) = message_content_value(msg) {
                input.push(InputItem {
                    r#type: "message",
                    role: msg.role.clone(),
                    content: Some(content),
                    ..Default::default()
                });
            }
            for call in &msg.tool_calls {
                input.push(InputItem {
                    r#type: "function_call",
                    call_id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                    status: "completed".to_string(),
                    ..Default::default()
                });
            }
            continue;
        }

        let content = message_content_value(msg)
            .unwrap_or_else(|| JsonValue::String(String::new()));
        input.push(InputItem {
            r#type: "message",
            role: msg.role.clone(),
            content: Some(content),
            ..Default::default()
        });
    }

    input
}

/// Message content as the upstream JSON shape: a plain string for simple
/// text, an `input_text`/`input_image` block array for multimodal content.
fn message_content_value(msg: &Message) -> Option<JsonValue> {
    let parts = msg.content_parts();
    if parts.is_empty() {
        return None;
    }

    if parts.len() == 1 && parts[0].r#type == "text" {
        return Some(JsonValue::String(parts[0].text.clone()));
    }

    let mut blocks = Vec::new();
    for part in &parts {
        match part.r#type.as_str() {
            "text" => blocks.push(ContentBlock {
                r#type: "input_text",
                text: part.text.clone(),
                image_url: String::new(),
                detail: String::new(),
            }),
            "image_url" => {
                if let Some(image) = &part.image_url {
                    blocks.push(ContentBlock {
                        r#type: "input_image",
                        text: String::new(),
                        image_url: image.url.clone(),
                        detail: image.detail.clone(),
                    });
                }
            }
            other => {
                warn!(r#type = other, "unknown content part type ignored");
            }
        }
    }

    if blocks.is_empty() {
        return None;
    }
    Some(serde_json::to_value(blocks).unwrap_or(JsonValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencompat_protocol::openai::request::{
        ContentPart, FunctionCall, ImageUrl, Message, MessageContent, Tool, ToolCall, ToolFunction,
    };

    fn user(text: &str) -> Message {
        Message {
            role: "user".to_string(),
            content: Some(MessageContent::Text(text.to_string())),
            ..Default::default()
        }
    }

    fn base_request(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: "chatgpt/gpt-5".to_string(),
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn system_messages_fold_into_leading_user_item() {
        let mut sys1 = user("be brief");
        sys1.role = "system".to_string();
        let mut sys2 = user("be kind");
        sys2.role = "system".to_string();

        let req = base_request(vec![sys1, user("hi"), sys2]);
        let out = transform_request(&req, "inst", &Config::from_env());

        assert_eq!(out.input.len(), 2);
        assert_eq!(out.input[0].role, "user");
        assert_eq!(
            out.input[0].content,
            Some(JsonValue::String("be brief\nbe kind".to_string()))
        );
        assert_eq!(out.input[1].content, Some(JsonValue::String("hi".to_string())));
    }

    #[test]
    fn tool_message_becomes_function_call_output_without_role() {
        let mut tool_msg = user("42");
        tool_msg.role = "tool".to_string();
        tool_msg.tool_call_id = "call_7".to_string();

        let req = base_request(vec![tool_msg]);
        let out = transform_request(&req, "inst", &Config::from_env());

        assert_eq!(out.input.len(), 1);
        let json = serde_json::to_value(&out.input[0]).expect("serialize");
        assert_eq!(json["type"], "function_call_output");
        assert_eq!(json["call_id"], "call_7");
        assert_eq!(json["output"], "42");
        assert!(json.get("role").is_none());
        assert!(json.get("id").is_none());
    }

    #[test]
    fn assistant_tool_calls_emit_completed_function_calls() {
        let assistant = Message {
            role: "assistant".to_string(),
            content: Some(MessageContent::Text("thinking".to_string())),
            tool_calls: vec![ToolCall {
                index: None,
                id: "c1".to_string(),
                r#type: "function".to_string(),
                function: FunctionCall {
                    name: "sum".to_string(),
                    arguments: "{\"a\":2,\"b\":2}".to_string(),
                },
            }],
            ..Default::default()
        };

        let req = base_request(vec![assistant]);
        let out = transform_request(&req, "inst", &Config::from_env());

        assert_eq!(out.input.len(), 2);
        assert_eq!(out.input[0].r#type, "message");
        assert_eq!(out.input[1].r#type, "function_call");
        assert_eq!(out.input[1].call_id, "c1");
        assert_eq!(out.input[1].status, "completed");
    }

    #[test]
    fn multimodal_content_maps_to_input_blocks() {
        let msg = Message {
            role: "user".to_string(),
            content: Some(MessageContent::Parts(vec![
                ContentPart {
                    r#type: "text".to_string(),
                    text: "what is this".to_string(),
                    image_url: None,
                },
                ContentPart {
                    r#type: "image_url".to_string(),
                    text: String::new(),
                    image_url: Some(ImageUrl {
                        url: "data:image/png;base64,xyz".to_string(),
                        detail: "high".to_string(),
                    }),
                },
            ])),
            ..Default::default()
        };

        let req = base_request(vec![msg]);
        let out = transform_request(&req, "inst", &Config::from_env());
        let content = out.input[0].content.as_ref().expect("content");
        assert_eq!(content[0]["type"], "input_text");
        assert_eq!(content[1]["type"], "input_image");
        assert_eq!(content[1]["detail"], "high");
    }

    #[test]
    fn non_function_tools_are_omitted() {
        let mut req = base_request(vec![user("hi")]);
        req.tools = vec![
            Tool {
                r#type: "function".to_string(),
                function: ToolFunction {
                    name: "sum".to_string(),
                    description: String::new(),
                    parameters: None,
                    strict: None,
                },
            },
            Tool {
                r#type: "web_search".to_string(),
                function: ToolFunction {
                    name: "ignored".to_string(),
                    description: String::new(),
                    parameters: None,
                    strict: None,
                },
            },
        ];
        let out = transform_request(&req, "inst", &Config::from_env());
        assert_eq!(out.tools.len(), 1);
        assert_eq!(out.tools[0].name, "sum");
    }

    #[test]
    fn effort_priority_suffix_over_request_over_default() {
        let mut req = base_request(vec![user("hi")]);
        req.model = "chatgpt/gpt-5-high".to_string();
        req.reasoning_effort = "low".to_string();
        let out = transform_request(&req, "inst", &Config::from_env());
        assert_eq!(out.model, "gpt-5.1");
        assert_eq!(out.reasoning.as_ref().expect("reasoning").effort, "high");

        let mut req = base_request(vec![user("hi")]);
        req.reasoning_effort = "low".to_string();
        let out = transform_request(&req, "inst", &Config::from_env());
        assert_eq!(out.reasoning.as_ref().expect("reasoning").effort, "low");
    }

    #[test]
    fn request_shape_is_stateless_streaming() {
        let req = base_request(vec![user("hi")]);
        let out = transform_request(&req, "inst", &Config::from_env());
        assert!(!out.store);
        assert!(out.stream);
        assert_eq!(out.include, vec!["reasoning.encrypted_content"]);
        assert_eq!(out.prompt_cache_key.len(), 16);
        assert_eq!(out.prompt_cache_key, prompt_cache_key("inst", "gpt-5.1"));
    }

    #[test]
    fn max_completion_tokens_preferred_over_legacy() {
        let mut req = base_request(vec![user("hi")]);
        req.max_tokens = Some(100);
        req.max_completion_tokens = Some(200);
        let out = transform_request(&req, "inst", &Config::from_env());
        assert_eq!(out.max_output_tokens, Some(200));

        let mut req = base_request(vec![user("hi")]);
        req.max_tokens = Some(100);
        let out = transform_request(&req, "inst", &Config::from_env());
        assert_eq!(out.max_output_tokens, Some(100));
    }

    #[test]
    fn null_and_empty_stop_are_dropped() {
        let mut req = base_request(vec![user("hi")]);
        req.stop = Some(JsonValue::Null);
        let out = transform_request(&req, "inst", &Config::from_env());
        assert!(out.stop.is_none());

        let mut req = base_request(vec![user("hi")]);
        req.stop = Some(serde_json::json!([]));
        let out = transform_request(&req, "inst", &Config::from_env());
        assert!(out.stop.is_none());

        let mut req = base_request(vec![user("hi")]);
        req.stop = Some(serde_json::json!(["END"]));
        let out = transform_request(&req, "inst", &Config::from_env());
        assert_eq!(out.stop, Some(serde_json::json!(["END"])));
    }
}
