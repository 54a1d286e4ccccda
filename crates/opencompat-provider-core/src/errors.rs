use std::error::Error;
use std::fmt;

use opencompat_protocol::openai::error::{ErrorResponse, UpstreamError};
use opencompat_store::StoreError;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug)]
pub enum ProviderError {
    /// Missing or unrefreshable credentials; surfaced as 401.
    Auth(String),
    /// Typed upstream failure carrying the upstream HTTP status.
    Upstream(UpstreamError),
    /// Network failure talking to the upstream.
    Transport(String),
    /// Bad internal state, unparseable upstream payloads, and the like.
    Invalid(String),
    Unsupported(&'static str),
}

impl ProviderError {
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        ProviderError::Upstream(UpstreamError::new(status, message))
    }

    /// Client-facing status code and OpenAI-shaped error body.
    pub fn to_response(&self) -> (u16, ErrorResponse) {
        match self {
            ProviderError::Auth(msg) => (401, ErrorResponse::authentication(msg.clone())),
            ProviderError::Upstream(err) => err.to_response(),
            ProviderError::Transport(msg) => (500, ErrorResponse::server(msg.clone())),
            ProviderError::Invalid(msg) => (500, ErrorResponse::server(msg.clone())),
            ProviderError::Unsupported(what) => {
                (500, ErrorResponse::server(format!("unsupported: {what}")))
            }
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "auth error: {msg}"),
            ProviderError::Upstream(err) => write!(f, "{err}"),
            ProviderError::Transport(msg) => write!(f, "transport error: {msg}"),
            ProviderError::Invalid(msg) => write!(f, "{msg}"),
            ProviderError::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

impl Error for ProviderError {}

impl From<StoreError> for ProviderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotLoggedIn(_) | StoreError::Refresh(_) => {
                ProviderError::Auth(err.to_string())
            }
            other => ProviderError::Invalid(other.to_string()),
        }
    }
}
