use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;

use opencompat_protocol::openai::error::ErrorResponse;
use opencompat_protocol::openai::stream::ChatCompletionChunk;

pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// One `data: <json>\n\n` frame for a streaming chunk.
pub fn chunk_frame(chunk: &ChatCompletionChunk) -> Option<Bytes> {
    let json = serde_json::to_vec(chunk).ok()?;
    Some(frame(&json))
}

/// Error payload frame used when frames were already written: the terminal
/// error becomes the last data frame before `[DONE]`.
pub fn error_frame(message: &str) -> Bytes {
    let body = ErrorResponse::server(message);
    let json = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    frame(&json)
}

fn frame(json: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(json.len() + 8);
    out.extend_from_slice(b"data: ");
    out.extend_from_slice(json);
    out.extend_from_slice(b"\n\n");
    Bytes::from(out)
}

/// Wrap a frame stream in a response with the SSE header set. Frames flush
/// as they arrive; there is no buffering beyond the channel.
pub fn sse_response<S>(body: S) -> Response
where
    S: futures_util::Stream<Item = Result<Bytes, std::convert::Infallible>> + Send + 'static,
{
    let mut resp = Response::new(Body::from_stream(body));
    *resp.status_mut() = StatusCode::OK;
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    resp
}
