use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn;
use axum::routing::{any, get, post};

use opencompat_provider_core::Registry;

use crate::handlers::{self, AppState, MAX_BODY_BYTES};
use crate::middleware;

/// Assemble the front door: routes plus the middleware chain
/// (recovery → logging → request-id → CORS, outermost first).
pub fn build_router(registry: Arc<Registry>) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/models", get(handlers::models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/{*rest}", any(handlers::unknown_endpoint))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(from_fn(middleware::cors))
        .layer(from_fn(middleware::request_id))
        .layer(from_fn(middleware::logging))
        .layer(from_fn(middleware::recovery))
        .with_state(state)
}
