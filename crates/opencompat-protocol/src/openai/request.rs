use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// OpenAI chat completion request as accepted on `/v1/chat/completions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    /// String or array of strings; forwarded opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<BTreeMap<String, i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    /// `"none"`, `"auto"`, `"required"`, or a tool selector object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_effort: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_usage: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refusal: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOutput>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_summary: String,
}

/// Message content is either a plain string or multimodal parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageUrl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub r#type: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Present only in streaming chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub r#type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ReasoningContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningContent {
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

impl Message {
    /// Plain-text view of the content. Multimodal parts collapse to the
    /// concatenation of their text parts.
    pub fn content_text(&self) -> String {
        match &self.content {
            None => String::new(),
            Some(MessageContent::Text(text)) => text.clone(),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .filter(|part| part.r#type == "text")
                .map(|part| part.text.as_str())
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Content as parts, wrapping a plain string as a single text part.
    pub fn content_parts(&self) -> Vec<ContentPart> {
        match &self.content {
            None => Vec::new(),
            Some(MessageContent::Text(text)) => vec![ContentPart {
                r#type: "text".to_string(),
                text: text.clone(),
                image_url: None,
            }],
            Some(MessageContent::Parts(parts)) => parts.clone(),
        }
    }

    pub fn has_image_content(&self) -> bool {
        matches!(&self.content, Some(MessageContent::Parts(parts))
            if parts.iter().any(|part| part.r#type == "image_url" || part.r#type == "image"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_parses_string_and_parts() {
        let msg: Message =
            serde_json::from_str(r#"{"role":"user","content":"hi"}"#).expect("parse");
        assert_eq!(msg.content_text(), "hi");

        let msg: Message = serde_json::from_str(
            r#"{"role":"user","content":[{"type":"text","text":"a"},{"type":"image_url","image_url":{"url":"data:x"}}]}"#,
        )
        .expect("parse");
        assert_eq!(msg.content_text(), "a");
        assert!(msg.has_image_content());
        assert_eq!(msg.content_parts().len(), 2);
    }

    #[test]
    fn tool_call_index_roundtrip() {
        let call = ToolCall {
            index: Some(0),
            id: "c1".to_string(),
            r#type: "function".to_string(),
            function: FunctionCall {
                name: "sum".to_string(),
                arguments: "{}".to_string(),
            },
        };
        let json = serde_json::to_value(&call).expect("serialize");
        assert_eq!(json["index"], 0);

        let plain = ToolCall {
            index: None,
            ..call
        };
        let json = serde_json::to_value(&plain).expect("serialize");
        assert!(json.get("index").is_none());
    }
}
