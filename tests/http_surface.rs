//! HTTP surface tests through the full router

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use lobbyroute::config::Config;
use lobbyroute::handlers::{AppState, app};
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;

const CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 3000

[[providers]]
id = "primary"
provider = "groq"
model = "llama-3.1-8b-instant"
base_url = "http://127.0.0.1:9/v1"

[[providers]]
id = "fallback"
provider = "local"
model = "qwen3:32b"
base_url = "http://127.0.0.1:9/v1"

[[cascade]]
id = "primary"
kind = "primary"
provider = "primary"
timeout_seconds = 2

[[cascade]]
id = "fallback"
kind = "last_resort"
provider = "fallback"
timeout_seconds = 2

[dispatch]
retry_jitter_seconds = 0
"#;

fn router() -> Router {
    let config = Config::from_str(CONFIG).expect("config should parse");
    let state = AppState::new(Arc::new(config)).expect("state should build");
    app(state)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = router().oneshot(get("/health")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["status"], "OK");
    assert_eq!(body["cascade_tiers"], 2);
}

#[tokio::test]
async fn test_chat_canned_reply() {
    let response = router()
        .oneshot(post("/chat", json!({"message": "thanks!"})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["source"]["type"], "canned");
    assert!(body["response"].as_str().is_some_and(|r| !r.is_empty()));
}

#[tokio::test]
async fn test_chat_deferred_when_providers_unreachable() {
    let response = router()
        .oneshot(post(
            "/chat",
            json!({"message": "please review my pull request", "priority": "high"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok()),
        Some("60")
    );
    let body = json_body(response).await;
    assert_eq!(body["status"], "deferred");
    assert_eq!(body["retry_after_seconds"], 60);
}

#[tokio::test]
async fn test_chat_rejects_empty_message() {
    let response = router()
        .oneshot(post("/chat", json!({"message": "  "})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_caller_request_id_is_echoed() {
    let id = "7f9c2b8e-3d4a-4c1e-9b2f-0a1b2c3d4e5f";
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", id)
        .body(Body::empty())
        .expect("request");
    let response = router().oneshot(request).await.expect("response");
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some(id)
    );
}

#[tokio::test]
async fn test_admin_providers_and_override() {
    let router = router();
    let response = router
        .clone()
        .oneshot(get("/admin/providers"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["providers"].as_array().map(Vec::len), Some(2));

    let response = router
        .clone()
        .oneshot(post(
            "/admin/providers/override",
            json!({"provider": "groq", "model": "llama-3.1-8b-instant", "bucket": "red"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["bucket"], "red");
    assert_eq!(body["overridden"], true);

    let response = router
        .oneshot(post(
            "/admin/providers/override",
            json!({"provider": "nobody", "model": "none", "bucket": "red"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_admin_cache_endpoints() {
    let router = router();
    let response = router
        .clone()
        .oneshot(post(
            "/admin/cache/clear",
            json!({"scope": "project", "value": "lobby"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["reason"], "manual");

    let response = router
        .clone()
        .oneshot(post("/admin/cache/clear", json!({"scope": "intent"})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .clone()
        .oneshot(post(
            "/admin/cache/invalidate",
            json!({"event": "deploy", "project": "lobby"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["event"], "deploy");

    let response = router
        .oneshot(get("/admin/cache/stats"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["entries"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint_reports_requests() {
    let router = router();
    let response = router
        .clone()
        .oneshot(post("/chat", json!({"message": "thanks"})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = router.oneshot(get("/metrics")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.contains("lobbyroute_requests_total"));
}
