//! API integration tests
//!
//! Hit the router with the demo state the way a client would. Uses
//! small `max_tokens` values so the tiny model keeps tests fast.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use recordar::api::{create_router, AppState};
use recordar::config::ServerConfig;
use tower::ServiceExt;

/// Test app with the demo model and the prompt cache enabled
fn create_test_app() -> axum::Router {
    let state = AppState::demo().expect("demo state should create");
    create_router(state)
}

/// Test app with the prompt cache disabled
fn create_uncached_app() -> axum::Router {
    let state = AppState::new(ServerConfig::default()).expect("state should create");
    create_router(state)
}

/// Build a JSON POST request
fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).expect("serialize")))
        .expect("request")
}

/// Build a GET request
fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

/// Build a DELETE request
fn delete_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&body).expect("json")
}

fn chat_body(content: &str, max_tokens: u64) -> serde_json::Value {
    serde_json::json!({
        "messages": [{"role": "user", "content": content}],
        "max_tokens": max_tokens,
        "temperature": 0.0
    })
}

// ============================================================================
// Health, metrics, models
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();
    let response = app.oneshot(get_request("/health")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["cache_enabled"], true);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = create_test_app();
    let response = app.oneshot(get_request("/metrics")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("recordar_requests_total"));
}

#[tokio::test]
async fn test_models_endpoint() {
    let app = create_test_app();
    let response = app
        .oneshot(get_request("/v1/models"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["object"], "list");
    assert_eq!(json["data"][0]["id"], "recordar-demo");
}

// ============================================================================
// Chat completions
// ============================================================================

#[tokio::test]
async fn test_chat_completion_happy_path() {
    let app = create_test_app();
    let response = app
        .oneshot(json_post("/v1/chat/completions", chat_body("hello", 4)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["object"], "chat.completion");
    assert_eq!(json["choices"][0]["message"]["role"], "assistant");
    assert!(json["choices"][0]["message"]["content"].is_string());
    let usage = &json["usage"];
    assert_eq!(
        usage["total_tokens"].as_u64(),
        Some(usage["prompt_tokens"].as_u64().expect("prompt") + usage["completion_tokens"].as_u64().expect("completion"))
    );
}

#[tokio::test]
async fn test_chat_completion_empty_messages_is_400() {
    let app = create_test_app();
    let body = serde_json::json!({"messages": []});
    let response = app
        .oneshot(json_post("/v1/chat/completions", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_completion_unknown_model_is_404() {
    let app = create_test_app();
    let body = serde_json::json!({
        "model": "other-model",
        "messages": [{"role": "user", "content": "hi"}]
    });
    let response = app
        .oneshot(json_post("/v1/chat/completions", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_chat_completion_invalid_kv_bits_is_400() {
    let app = create_test_app();
    let body = serde_json::json!({
        "messages": [{"role": "user", "content": "hi"}],
        "kv_bits": 6
    });
    let response = app
        .oneshot(json_post("/v1/chat/completions", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = json_body(response).await;
    assert!(json["error"].as_str().expect("error").contains("kv_bits"));
}

#[tokio::test]
async fn test_chat_completion_invalid_group_size_is_400() {
    let app = create_test_app();
    let body = serde_json::json!({
        "messages": [{"role": "user", "content": "hi"}],
        "kv_bits": 8,
        "kv_group_size": 12
    });
    let response = app
        .oneshot(json_post("/v1/chat/completions", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_completion_streaming_is_sse() {
    let app = create_test_app();
    let body = serde_json::json!({
        "messages": [{"role": "user", "content": "hi"}],
        "max_tokens": 3,
        "temperature": 0.0,
        "stream": true
    });
    let response = app
        .oneshot(json_post("/v1/chat/completions", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .expect("content-type")
        .to_str()
        .expect("str");
    assert!(content_type.starts_with("text/event-stream"));

    let body = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("chat.completion.chunk"));
    assert!(text.trim_end().ends_with("data: [DONE]"));
}

// ============================================================================
// Text completions and embeddings
// ============================================================================

#[tokio::test]
async fn test_completion_happy_path() {
    let app = create_test_app();
    let body = serde_json::json!({
        "prompt": "once upon a time",
        "max_tokens": 4,
        "temperature": 0.0
    });
    let response = app
        .oneshot(json_post("/v1/completions", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["object"], "text_completion");
    assert!(json["choices"][0]["text"].is_string());
}

#[tokio::test]
async fn test_completion_empty_prompt_is_400() {
    let app = create_test_app();
    let body = serde_json::json!({"prompt": ""});
    let response = app
        .oneshot(json_post("/v1/completions", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_embeddings_single_and_batch() {
    let app = create_test_app();
    let response = app
        .clone()
        .oneshot(json_post(
            "/v1/embeddings",
            serde_json::json!({"input": "hello"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"].as_array().expect("data").len(), 1);

    let response = app
        .oneshot(json_post(
            "/v1/embeddings",
            serde_json::json!({"input": ["a", "b", "c"]}),
        ))
        .await
        .expect("response");
    let json = json_body(response).await;
    assert_eq!(json["data"].as_array().expect("data").len(), 3);
    assert_eq!(json["data"][2]["index"], 2);
}

// ============================================================================
// Cache management surface
// ============================================================================

#[tokio::test]
async fn test_cache_status_starts_empty() {
    let app = create_test_app();
    let response = app
        .oneshot(get_request("/v1/cache/status"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["enabled"], true);
    assert_eq!(json["entry_count"], 0);
    assert_eq!(json["stats"]["hits"], 0);
    assert_eq!(json["stats"]["misses"], 0);
}

#[tokio::test]
async fn test_cache_fills_and_hits_across_requests() {
    let app = create_test_app();

    // First request is a miss and stores an entry
    let response = app
        .clone()
        .oneshot(json_post(
            "/v1/chat/completions",
            chat_body("the quick brown fox", 3),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let status = json_body(
        app.clone()
            .oneshot(get_request("/v1/cache/status"))
            .await
            .expect("response"),
    )
    .await;
    assert_eq!(status["entry_count"], 1);
    assert_eq!(status["stats"]["misses"], 1);

    // The same conversation again reuses the stored prefix
    let response = app
        .clone()
        .oneshot(json_post(
            "/v1/chat/completions",
            chat_body("the quick brown fox", 3),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let status = json_body(
        app.oneshot(get_request("/v1/cache/status"))
            .await
            .expect("response"),
    )
    .await;
    assert_eq!(status["stats"]["hits"], 1);
    assert!(status["stats"]["total_tokens_reused"].as_u64().expect("reused") > 0);
}

#[tokio::test]
async fn test_cache_clear_endpoint() {
    let app = create_test_app();
    let response = app
        .clone()
        .oneshot(json_post("/v1/chat/completions", chat_body("warm me up", 3)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(
        app.clone()
            .oneshot(delete_request("/v1/cache"))
            .await
            .expect("response"),
    )
    .await;
    assert_eq!(json["success"], true);

    let status = json_body(
        app.oneshot(get_request("/v1/cache/status"))
            .await
            .expect("response"),
    )
    .await;
    assert_eq!(status["entry_count"], 0);
    // Stats survive a clear
    assert_eq!(status["stats"]["misses"], 1);
}

#[tokio::test]
async fn test_disabled_cache_surface() {
    let app = create_uncached_app();

    let status = json_body(
        app.clone()
            .oneshot(get_request("/v1/cache/status"))
            .await
            .expect("response"),
    )
    .await;
    assert_eq!(status["enabled"], false);
    assert_eq!(status["entry_count"], 0);

    let json = json_body(
        app.clone()
            .oneshot(delete_request("/v1/cache"))
            .await
            .expect("response"),
    )
    .await;
    assert_eq!(json["success"], false);

    // Generation still works without the cache
    let response = app
        .oneshot(json_post("/v1/chat/completions", chat_body("hi", 3)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}
