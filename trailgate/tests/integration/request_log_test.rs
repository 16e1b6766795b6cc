//! Integration Test: リクエストログインターセプタ
//!
//! ステータスに応じたレベルとボディ付与、パニック時の500応答、
//! 除外パス、セカンダリメトリクスへのトレース転送を確認する。

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use trailgate::audit::context::ResolvedActor;
use trailgate::audit::middleware::request_log_middleware;
use trailgate::monitoring::MetricsForwarder;
use trailgate::AppState;

use crate::support::{self, Capture, MemoryMonitoringStore};

async fn create_item(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({"id": 1, "name": body["name"]}))
}

async fn missing_item() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "item not found", "refreshToken": "leaked-refresh"})),
    )
}

async fn explode() -> Json<Value> {
    panic!("boom")
}

async fn whoami(actor: Option<Extension<ResolvedActor>>) -> Json<Value> {
    Json(json!({
        "resolved": actor.is_some(),
        "actor": actor.map(|Extension(a)| a),
    }))
}

fn test_router(state: AppState) -> Router {
    Router::new()
        .route("/api/items", post(create_item))
        .route("/api/items/missing", post(missing_item))
        .route("/api/explode", get(explode))
        .route("/api/whoami", get(whoami))
        .route("/static/explode", get(explode))
        .route("/static/whoami", get(whoami))
        .route("/health", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_log_middleware,
        ))
        .with_state(state)
}

fn json_post(uri: &str, body: &Value) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("content-length", bytes.len())
        .body(Body::from(bytes))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_success_is_logged_without_bodies() {
    let (state, _pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let capture = Capture::default();
    let _guard = capture.install();

    let response = test_router(state)
        .oneshot(json_post("/api/items", &json!({"name": "a", "password": "p4ss"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["name"], "a");

    let records = capture.request_records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["level"], "INFO");
    assert_eq!(record["status"], 200);
    assert_eq!(record["method"], "POST");
    assert_eq!(record["uri"], "/api/items");
    assert!(record.get("request_body").is_none());
    assert!(record.get("response_body").is_none());
    assert!(!capture.contents().contains("p4ss"));
}

#[tokio::test]
async fn test_client_error_is_logged_with_redacted_bodies() {
    let (state, _pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let capture = Capture::default();
    let _guard = capture.install();

    let response = test_router(state)
        .oneshot(json_post(
            "/api/items/missing",
            &json!({"lookup": "x", "password": "hunter2-secret"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    // クライアントにはマスク前の応答がそのまま返る
    assert_eq!(body_json(response).await["error"], "item not found");

    let records = capture.request_records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["level"], "WARN");
    assert_eq!(record["status"], 404);

    let request_body: Value =
        serde_json::from_str(record["request_body"].as_str().unwrap()).unwrap();
    assert_eq!(request_body["lookup"], "x");
    assert_eq!(request_body["password"], "[REDACTED]");

    let response_body: Value =
        serde_json::from_str(record["response_body"].as_str().unwrap()).unwrap();
    assert_eq!(response_body["error"], "item not found");
    assert_eq!(response_body["refreshToken"], "[REDACTED]");

    let raw = capture.contents();
    assert!(!raw.contains("hunter2-secret"));
    assert!(!raw.contains("leaked-refresh"));
}

#[tokio::test]
async fn test_panic_becomes_500_and_error_record() {
    let (state, _pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let capture = Capture::default();
    let _guard = capture.install();

    let response = test_router(state)
        .oneshot(
            Request::builder()
                .uri("/api/explode")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Internal server error"})
    );

    let records = capture.request_records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["level"], "ERROR");
    assert_eq!(record["status"], 500);
    assert_eq!(record["error_name"], "panic");
    assert_eq!(record["error_message"], "boom");
}

#[tokio::test]
async fn test_excluded_path_is_not_logged() {
    let (state, _pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let capture = Capture::default();
    let _guard = capture.install();

    let response = test_router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(capture.request_records().is_empty());
}

#[tokio::test]
async fn test_panic_on_excluded_path_still_becomes_500() {
    let (state, _pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let capture = Capture::default();
    let _guard = capture.install();

    let response = test_router(state)
        .oneshot(
            Request::builder()
                .uri("/static/explode")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Internal server error"})
    );
    assert!(capture.request_records().is_empty());
}

#[tokio::test]
async fn test_identity_resolved_on_excluded_path() {
    let (state, _pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let router = test_router(state);

    for uri in ["/api/whoami", "/static/whoami"] {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["resolved"], true, "{uri}");
        assert_eq!(body["actor"]["kind"], "anonymous", "{uri}");
    }
}

#[tokio::test]
async fn test_trace_skipped_for_excluded_path() {
    let store = Arc::new(MemoryMonitoringStore::default());
    let metrics = MetricsForwarder::with_store(store.clone(), support::manual_flush_settings());
    let (state, _pool) = support::build_test_state(metrics.clone()).await;

    let response = test_router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    metrics.shutdown().await;
    assert!(store.traces.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_trace_forwarded_when_monitoring_enabled() {
    let store = Arc::new(MemoryMonitoringStore::default());
    let metrics = MetricsForwarder::with_store(store.clone(), support::manual_flush_settings());
    let (state, _pool) = support::build_test_state(metrics.clone()).await;

    let response = test_router(state)
        .oneshot(json_post("/api/items", &json!({"name": "b"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    metrics.shutdown().await;

    let traces = store.traces.lock().unwrap().clone();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].method, "POST");
    assert_eq!(traces[0].uri, "/api/items");
    assert_eq!(traces[0].status, 200);
}

#[tokio::test]
async fn test_trace_skipped_when_monitoring_disabled() {
    let (state, _pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let metrics = state.metrics.clone();

    test_router(state)
        .oneshot(json_post("/api/items", &json!({"name": "c"})))
        .await
        .unwrap();

    assert!(!metrics.is_enabled());
    assert!(metrics.stats().is_none());
}
