use serde::Deserialize;

// Event names on the responses SSE stream.
pub const EVENT_RESPONSE_CREATED: &str = "response.created";
pub const EVENT_RESPONSE_IN_PROGRESS: &str = "response.in_progress";
pub const EVENT_RESPONSE_COMPLETED: &str = "response.completed";
pub const EVENT_RESPONSE_FAILED: &str = "response.failed";
pub const EVENT_RESPONSE_INCOMPLETE: &str = "response.incomplete";
pub const EVENT_RESPONSE_CANCELLED: &str = "response.cancelled";
pub const EVENT_RESPONSE_QUEUED: &str = "response.queued";

pub const EVENT_OUTPUT_ITEM_ADDED: &str = "response.output_item.added";
pub const EVENT_OUTPUT_ITEM_DONE: &str = "response.output_item.done";

pub const EVENT_CONTENT_PART_ADDED: &str = "response.content_part.added";
pub const EVENT_CONTENT_PART_DONE: &str = "response.content_part.done";

pub const EVENT_OUTPUT_TEXT_DELTA: &str = "response.output_text.delta";
pub const EVENT_OUTPUT_TEXT_DONE: &str = "response.output_text.done";

pub const EVENT_FUNCTION_CALL_ARGUMENTS_DELTA: &str = "response.function_call_arguments.delta";
pub const EVENT_FUNCTION_CALL_ARGUMENTS_DONE: &str = "response.function_call_arguments.done";

pub const EVENT_REASONING_SUMMARY_PART_ADDED: &str = "response.reasoning_summary_part.added";
pub const EVENT_REASONING_SUMMARY_PART_DONE: &str = "response.reasoning_summary_part.done";
pub const EVENT_REASONING_SUMMARY_TEXT_DELTA: &str = "response.reasoning_summary_text.delta";
pub const EVENT_REASONING_SUMMARY_TEXT_DONE: &str = "response.reasoning_summary_text.done";

pub const EVENT_REASONING_TEXT_DELTA: &str = "response.reasoning_text.delta";
pub const EVENT_REASONING_TEXT_DONE: &str = "response.reasoning_text.done";

pub const EVENT_WEB_SEARCH_SEARCHING: &str = "response.web_search_call.searching";
pub const EVENT_WEB_SEARCH_IN_PROGRESS: &str = "response.web_search_call.in_progress";
pub const EVENT_WEB_SEARCH_COMPLETED: &str = "response.web_search_call.completed";

pub const EVENT_FILE_SEARCH_SEARCHING: &str = "response.file_search_call.searching";
pub const EVENT_FILE_SEARCH_IN_PROGRESS: &str = "response.file_search_call.in_progress";
pub const EVENT_FILE_SEARCH_COMPLETED: &str = "response.file_search_call.completed";

pub const EVENT_MCP_CALL_IN_PROGRESS: &str = "response.mcp_call.in_progress";
pub const EVENT_MCP_CALL_COMPLETED: &str = "response.mcp_call.completed";
pub const EVENT_MCP_CALL_FAILED: &str = "response.mcp_call.failed";
pub const EVENT_MCP_CALL_ARGUMENTS_DELTA: &str = "response.mcp_call_arguments.delta";
pub const EVENT_MCP_CALL_ARGUMENTS_DONE: &str = "response.mcp_call_arguments.done";

pub const EVENT_CODE_INTERPRETER_IN_PROGRESS: &str = "response.code_interpreter_call.in_progress";
pub const EVENT_CODE_INTERPRETER_INTERPRETING: &str =
    "response.code_interpreter_call.interpreting";
pub const EVENT_CODE_INTERPRETER_COMPLETED: &str = "response.code_interpreter_call.completed";
pub const EVENT_CODE_INTERPRETER_CODE_DELTA: &str = "response.code_interpreter_call_code.delta";
pub const EVENT_CODE_INTERPRETER_CODE_DONE: &str = "response.code_interpreter_call_code.done";

pub const EVENT_IMAGE_GENERATION_IN_PROGRESS: &str = "response.image_generation_call.in_progress";
pub const EVENT_IMAGE_GENERATION_GENERATING: &str = "response.image_generation_call.generating";
pub const EVENT_IMAGE_GENERATION_PARTIAL_IMAGE: &str =
    "response.image_generation_call.partial_image";
pub const EVENT_IMAGE_GENERATION_COMPLETED: &str = "response.image_generation_call.completed";

pub const EVENT_ERROR: &str = "error";

#[derive(Debug, Default, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub response: ResponseData,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Option<UsageData>,
    #[serde(default)]
    pub error: Option<ErrorData>,
    #[serde(default)]
    pub incomplete_reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UsageData {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub input_tokens_details: Option<InputTokensDetails>,
    #[serde(default)]
    pub output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InputTokensDetails {
    #[serde(default)]
    pub cached_tokens: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TextDeltaData {
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub content_index: i64,
    #[serde(default)]
    pub delta: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FunctionArgumentsDeltaData {
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub delta: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputItemData {
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub item: OutputItem,
}

/// Output item shared by `output_item.added`/`.done` across every `*_call`
/// kind (function, web_search, mcp, code_interpreter, ...).
#[derive(Debug, Default, Deserialize)]
pub struct OutputItem {
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub parameters: Option<WebSearchParams>,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContentPartData {
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub content_index: i64,
    #[serde(default)]
    pub part: ContentPart,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebSearchCallData {
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub output_index: i64,
    #[serde(default)]
    pub item: Option<WebSearchCallItem>,
    #[serde(default)]
    pub query: String,
    #[serde(default, rename = "parameters")]
    pub params: Option<WebSearchParams>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebSearchCallItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub parameters: Option<WebSearchParams>,
}

/// Web-search parameters accumulated across progress events.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize, PartialEq)]
pub struct WebSearchParams {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_results: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recency: String,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorEventData {
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Parse an event payload, tolerating missing fields.
pub fn parse_data<T: serde::de::DeserializeOwned + Default>(data: &str) -> Result<T, String> {
    if data.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(data).map_err(|err| err.to_string())
}
