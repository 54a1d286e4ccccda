use serde::{Deserialize, Serialize};

pub const ERROR_TYPE_INVALID_REQUEST: &str = "invalid_request_error";
pub const ERROR_TYPE_AUTHENTICATION: &str = "authentication_error";
pub const ERROR_TYPE_NOT_FOUND: &str = "not_found_error";
pub const ERROR_TYPE_RATE_LIMIT: &str = "rate_limit_error";
pub const ERROR_TYPE_SERVER: &str = "server_error";
pub const ERROR_TYPE_SERVICE_UNAVAILABLE: &str = "service_unavailable";

/// OpenAI-shaped error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(r#type: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: r#type.to_string(),
                param: None,
                code: None,
            },
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ERROR_TYPE_INVALID_REQUEST, message)
    }

    pub fn invalid_request_param(message: impl Into<String>, param: impl Into<String>) -> Self {
        let mut resp = Self::new(ERROR_TYPE_INVALID_REQUEST, message);
        resp.error.param = Some(param.into());
        resp
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ERROR_TYPE_AUTHENTICATION, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ERROR_TYPE_NOT_FOUND, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ERROR_TYPE_SERVER, message)
    }

    pub fn model_not_found(model: &str) -> Self {
        let mut resp = Self::new(
            ERROR_TYPE_NOT_FOUND,
            format!("The model `{model}` does not exist or you do not have access to it."),
        );
        resp.error.code = Some("model_not_found".to_string());
        resp
    }
}

/// Error surfaced by an upstream provider with its HTTP status.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub status: u16,
    pub message: String,
}

impl UpstreamError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Map the upstream status to the client-facing status and error body.
    pub fn to_response(&self) -> (u16, ErrorResponse) {
        let message = self.message.clone();
        match self.status {
            400 => (400, ErrorResponse::new(ERROR_TYPE_INVALID_REQUEST, message)),
            401 | 403 => (
                self.status,
                ErrorResponse::new(ERROR_TYPE_AUTHENTICATION, message),
            ),
            404 => (404, ErrorResponse::new(ERROR_TYPE_NOT_FOUND, message)),
            429 => (429, ErrorResponse::new(ERROR_TYPE_RATE_LIMIT, message)),
            502 | 503 | 504 => (
                self.status,
                ErrorResponse::new(ERROR_TYPE_SERVICE_UNAVAILABLE, message),
            ),
            status if status >= 500 => (
                502,
                ErrorResponse::new(ERROR_TYPE_SERVICE_UNAVAILABLE, message),
            ),
            _ => (502, ErrorResponse::new(ERROR_TYPE_SERVER, message)),
        }
    }
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream status {}: {}", self.status, self.message)
    }
}

impl std::error::Error for UpstreamError {}

/// Best-effort extraction of a message from an upstream error body.
pub fn parse_upstream_error(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(default)]
        error: Inner,
        #[serde(default)]
        message: String,
        #[serde(default)]
        detail: String,
    }
    #[derive(Default, Deserialize)]
    struct Inner {
        #[serde(default)]
        message: String,
    }

    if let Ok(parsed) = serde_json::from_slice::<Envelope>(body) {
        if !parsed.error.message.is_empty() {
            return parsed.error.message;
        }
        if !parsed.message.is_empty() {
            return parsed.message;
        }
        if !parsed.detail.is_empty() {
            return parsed.detail;
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.starts_with('<') {
        return "Upstream server returned an error".to_string();
    }
    if text.is_empty() {
        return "unknown error".to_string();
    }
    let mut text = text.to_string();
    if text.len() > 500 {
        text.truncate(500);
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_not_found_shape() {
        let resp = ErrorResponse::model_not_found("bogus/x");
        let json = serde_json::to_value(&resp).expect("serialize");
        assert_eq!(json["error"]["code"], "model_not_found");
        assert_eq!(json["error"]["type"], "not_found_error");
        assert_eq!(
            json["error"]["message"],
            "The model `bogus/x` does not exist or you do not have access to it."
        );
    }

    #[test]
    fn upstream_status_mapping() {
        assert_eq!(UpstreamError::new(400, "x").to_response().0, 400);
        assert_eq!(
            UpstreamError::new(401, "x").to_response().1.error.r#type,
            ERROR_TYPE_AUTHENTICATION
        );
        assert_eq!(UpstreamError::new(403, "x").to_response().0, 403);
        assert_eq!(
            UpstreamError::new(429, "x").to_response().1.error.r#type,
            ERROR_TYPE_RATE_LIMIT
        );
        assert_eq!(UpstreamError::new(503, "x").to_response().0, 503);
        // Unlisted 5xx collapses to a 502 gateway error.
        assert_eq!(UpstreamError::new(500, "x").to_response().0, 502);
    }

    #[test]
    fn upstream_error_body_extraction() {
        assert_eq!(
            parse_upstream_error(br#"{"error":{"message":"boom"}}"#),
            "boom"
        );
        assert_eq!(parse_upstream_error(br#"{"detail":"nope"}"#), "nope");
        assert_eq!(
            parse_upstream_error(b"<html>bad gateway</html>"),
            "Upstream server returned an error"
        );
        assert_eq!(parse_upstream_error(b""), "unknown error");
    }
}
