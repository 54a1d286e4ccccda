use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::Response;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use opencompat_protocol::openai::error::ErrorResponse;
use opencompat_protocol::openai::request::ChatCompletionRequest;
use opencompat_protocol::openai::response::ModelList;
use opencompat_protocol::openai::stream::ChatCompletionChunk;
use opencompat_provider_core::{ChatRequest, ChatStream, ProviderError, Registry, RouteError};

use crate::sse;

/// Request body cap (10 MiB).
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const VALID_ROLES: &[&str] = &["system", "user", "assistant", "tool"];

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

pub fn json_error_response(status: StatusCode, body: &ErrorResponse) -> Response {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let mut resp = Response::new(Body::from(json));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    resp
}

fn bad_request(message: &str) -> Response {
    json_error_response(StatusCode::BAD_REQUEST, &ErrorResponse::invalid_request(message))
}

fn bad_request_param(message: &str, param: &str) -> Response {
    json_error_response(
        StatusCode::BAD_REQUEST,
        &ErrorResponse::invalid_request_param(message, param),
    )
}

fn provider_error_response(err: &ProviderError) -> Response {
    let (status, body) = err.to_response();
    json_error_response(
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        &body,
    )
}

fn route_error_response(err: &RouteError, model: &str) -> Response {
    match err {
        RouteError::MissingPrefix => bad_request_param(
            &format!("model must include provider prefix (e.g., 'chatgpt/gpt-5-codex'), got: {model}"),
            "model",
        ),
        RouteError::UnknownProvider(_) => {
            json_error_response(StatusCode::NOT_FOUND, &ErrorResponse::model_not_found(model))
        }
        RouteError::NotLoggedIn(pid) => json_error_response(
            StatusCode::UNAUTHORIZED,
            &ErrorResponse::authentication(format!(
                "provider '{pid}' requires login (run: opencompat login {pid})"
            )),
        ),
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn models(State(state): State<AppState>) -> Json<ModelList> {
    Json(ModelList::new(state.registry.all_models().await))
}

/// OpenAI-shaped 404 for unknown `/v1/*` endpoints.
pub async fn unknown_endpoint(uri: Uri) -> Response {
    json_error_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse::not_found(format!("Unknown endpoint: {}", uri.path())),
    )
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, axum::extract::rejection::BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let text = rejection.to_string();
            if text.contains("length limit") {
                return bad_request("Request body too large (max 10MB)");
            }
            return bad_request(&format!("Failed to read request body: {text}"));
        }
    };

    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return bad_request(&format!("Invalid JSON: {err}")),
    };

    if req.model.is_empty() {
        return bad_request_param("model is required", "model");
    }

    let (provider, model_id) = match state.registry.provider_for_model(&req.model) {
        Ok(found) => found,
        Err(err) => return route_error_response(&err, &req.model),
    };

    if !provider.supports_model(&model_id).await {
        return json_error_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse::model_not_found(&req.model),
        );
    }

    if req.messages.is_empty() {
        return bad_request_param("messages is required", "messages");
    }
    for (i, msg) in req.messages.iter().enumerate() {
        if !VALID_ROLES.contains(&msg.role.as_str()) {
            return bad_request_param(
                &format!(
                    "Invalid role '{}'. Must be one of: system, user, assistant, tool",
                    msg.role
                ),
                &format!("messages[{i}].role"),
            );
        }
        if msg.role == "tool" && msg.tool_call_id.is_empty() {
            return bad_request_param(
                "Tool messages must include tool_call_id",
                &format!("messages[{i}].tool_call_id"),
            );
        }
    }

    let is_stream = req.stream;
    let chat_req = build_chat_request(req, model_id, &headers);

    let mut stream = match provider.chat_completion(chat_req).await {
        Ok(stream) => stream,
        Err(err) => return provider_error_response(&err),
    };

    if is_stream {
        stream_response(stream).await
    } else {
        drain_response(stream.as_mut()).await
    }
}

fn build_chat_request(req: ChatCompletionRequest, model_id: String, headers: &HeaderMap) -> ChatRequest {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string()
    };

    ChatRequest {
        model: model_id,
        messages: req.messages,
        tools: req.tools,
        tool_choice: req.tool_choice,
        parallel_tool_calls: req.parallel_tool_calls,
        temperature: req.temperature,
        top_p: req.top_p,
        n: req.n,
        stop: req.stop,
        max_tokens: req.max_tokens,
        max_completion_tokens: req.max_completion_tokens,
        presence_penalty: req.presence_penalty,
        frequency_penalty: req.frequency_penalty,
        logit_bias: req.logit_bias,
        seed: req.seed,
        response_format: req.response_format,
        stream: req.stream,
        stream_options: req.stream_options,
        reasoning_effort: req.reasoning_effort,
        reasoning_summary: header_value("X-Reasoning-Summary"),
        reasoning_compat: header_value("X-Reasoning-Compat"),
        text_verbosity: header_value("X-Text-Verbosity"),
    }
}

/// Streaming path. The first chunk is pulled before any headers go out so
/// early failures can still become plain HTTP errors; afterwards errors
/// turn into a terminal SSE error frame.
async fn stream_response(mut stream: Box<dyn ChatStream>) -> Response {
    let first = match stream.next_chunk().await {
        Ok(first) => first,
        Err(err) => return provider_error_response(&err),
    };

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);
    tokio::spawn(async move {
        if let Some(chunk) = first {
            if send_chunk(&tx, &chunk).await.is_err() {
                return;
            }
            loop {
                match stream.next_chunk().await {
                    Ok(Some(chunk)) => {
                        if send_chunk(&tx, &chunk).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let _ = tx.send(Ok(sse::error_frame(&err.to_string()))).await;
                        let _ = tx.send(Ok(Bytes::from_static(sse::DONE_FRAME))).await;
                        return;
                    }
                }
            }
        }

        if let Some(message) = stream.stream_error() {
            let _ = tx
                .send(Ok(sse::error_frame(&format!("Upstream error: {message}"))))
                .await;
        }
        let _ = tx.send(Ok(Bytes::from_static(sse::DONE_FRAME))).await;
    });

    sse::sse_response(ReceiverStream::new(rx))
}

async fn send_chunk(
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
    chunk: &ChatCompletionChunk,
) -> Result<(), ()> {
    let Some(frame) = sse::chunk_frame(chunk) else {
        warn!("failed to serialize stream chunk");
        return Ok(());
    };
    tx.send(Ok(frame)).await.map_err(|_| ())
}

/// Non-streaming path: drain the translated stream, then return either the
/// synthesized response or the mapped error.
async fn drain_response(stream: &mut dyn ChatStream) -> Response {
    loop {
        match stream.next_chunk().await {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(err) => return provider_error_response(&err),
        }
    }

    if let Some(message) = stream.stream_error() {
        return json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ErrorResponse::server(format!("Upstream error: {message}")),
        );
    }

    match stream.response() {
        Some(response) if !response.id.is_empty() => {
            let json = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
            let mut resp = Response::new(Body::from(json));
            resp.headers_mut().insert(
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderValue::from_static("application/json"),
            );
            resp
        }
        _ => json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ErrorResponse::server("No response received from upstream"),
        ),
    }
}
