//! Integration Test: 監査ログAPI
//!
//! 認証（APIキー / セッションCookie）、検索・ページング、エクスポートとその監査記録、
//! 保持期間プレビューを確認する。

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::Duration;
use serde_json::Value;
use tower::ServiceExt;
use trailgate::api;
use trailgate::audit::types::{AuditAction, AuditEntry, AuditFilter, EntityKind};
use trailgate::db::identity::SqliteIdentityResolver;
use trailgate::monitoring::MetricsForwarder;

use crate::support;

fn get(uri: &str, api_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .header("user-agent", "audit-api-test")
        .header("x-forwarded-for", "203.0.113.7");
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn entry(action: AuditAction, actor: &str) -> AuditEntry {
    let mut entry = AuditEntry::new(action, EntityKind::Resource);
    entry.actor_id = Some(actor.to_string());
    entry
}

#[tokio::test]
async fn test_requires_credentials() {
    let (state, _pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let app = api::create_app(state);

    let response = app.clone().oneshot(get("/api/audit-logs", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"], "Authentication required");

    let response = app
        .oneshot(get("/api/audit-logs", Some("tg_not-a-real-key")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_with_api_key_filters_and_pages() {
    let (state, pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let issued = SqliteIdentityResolver::new(pool)
        .issue_api_key("reader", Some("admin-1"), None)
        .await
        .unwrap();

    let mut entries = Vec::new();
    for _ in 0..3 {
        entries.push(entry(AuditAction::ResourceCreate, "alice"));
    }
    entries.push(entry(AuditAction::ResourceDelete, "bob"));
    state.audit_log_storage.insert_batch(&entries).await.unwrap();

    let app = api::create_app(state);

    let response = app
        .clone()
        .oneshot(get(
            "/api/audit-logs?actor_id=alice&limit=2&page=1",
            Some(issued.key.as_str()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(page["total"], 3);
    assert_eq!(page["page_count"], 2);
    assert_eq!(page["entries"].as_array().unwrap().len(), 2);

    let response = app
        .oneshot(get("/api/audit-logs?action=launch_rockets", Some(issued.key.as_str())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let (state, pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let token = SqliteIdentityResolver::new(pool)
        .create_session("user-9", Duration::hours(1))
        .await
        .unwrap();

    let request = Request::builder()
        .uri("/api/audit-logs/archival-preview?retention_days=30")
        .header(header::COOKIE, format!("theme=dark; trailgate_session={}", token))
        .body(Body::empty())
        .unwrap();
    let response = api::create_app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let preview: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(preview["retention_days"], 30);
    assert_eq!(preview["count"], 0);
}

#[tokio::test]
async fn test_archival_preview_rejects_non_positive_retention() {
    let (state, pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let issued = SqliteIdentityResolver::new(pool)
        .issue_api_key("ops", None, None)
        .await
        .unwrap();

    let response = api::create_app(state)
        .oneshot(get(
            "/api/audit-logs/archival-preview?retention_days=0",
            Some(issued.key.as_str()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_csv_export_is_itself_audited() {
    let (state, pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let issued = SqliteIdentityResolver::new(pool)
        .issue_api_key("exporter", Some("admin-2"), None)
        .await
        .unwrap();
    state
        .audit_log_storage
        .insert_batch(&[
            entry(AuditAction::AuthLogin, "carol"),
            entry(AuditAction::AuthLogout, "carol"),
        ])
        .await
        .unwrap();

    let app = api::create_app(state.clone());
    let response = app
        .oneshot(get("/api/audit-logs/export?format=csv", Some(issued.key.as_str())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"audit-logs-"));
    assert!(disposition.ends_with(".csv\""));

    let csv = String::from_utf8(body_bytes(response).await).unwrap();
    assert_eq!(csv.lines().count(), 3, "header plus two rows");
    assert!(csv.starts_with("\"id\",\"created_at\""));

    state.audit_recorder.queue().shutdown().await;

    let exports = state
        .audit_log_storage
        .query(
            &AuditFilter {
                action: Some(AuditAction::DataExport),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(exports.total, 1);
    let recorded = &exports.entries[0];
    assert_eq!(recorded.actor_id.as_deref(), Some("admin-2"));
    assert_eq!(recorded.api_key_id.as_deref(), Some(issued.id.as_str()));
    assert_eq!(recorded.ip_address.as_deref(), Some("203.0.113.7"));
    assert_eq!(recorded.user_agent.as_deref(), Some("audit-api-test"));
    assert_eq!(recorded.metadata["format"], "csv");
    assert_eq!(recorded.metadata["rows"], 2);
}

#[tokio::test]
async fn test_unknown_export_format_is_rejected() {
    let (state, pool) = support::build_test_state(MetricsForwarder::disabled()).await;
    let issued = SqliteIdentityResolver::new(pool)
        .issue_api_key("exporter", None, None)
        .await
        .unwrap();

    let response = api::create_app(state)
        .oneshot(get("/api/audit-logs/export?format=xml", Some(issued.key.as_str())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
