//! Route wiring
//!
//! Builds the axum router over [`AppState`]. Health and metrics handlers
//! live here; inference and cache management handlers have their own
//! modules.

use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};

use super::cache_handlers::{cache_clear_handler, cache_status_handler};
use super::openai_handlers::{
    openai_chat_completions_handler, openai_completions_handler, openai_embeddings_handler,
    openai_models_handler,
};
use super::{AppState, HealthResponse};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // OpenAI-compatible API (v1)
        .route("/v1/models", get(openai_models_handler))
        .route("/v1/completions", post(openai_completions_handler))
        .route(
            "/v1/chat/completions",
            post(openai_chat_completions_handler),
        )
        .route("/v1/embeddings", post(openai_embeddings_handler))
        // Prompt cache management
        .route("/v1/cache/status", get(cache_status_handler))
        .route("/v1/cache", delete(cache_clear_handler))
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: crate::VERSION.to_string(),
        cache_enabled: state.bridge().enabled(),
    })
}

/// Prometheus metrics handler
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics().to_prometheus()
}
