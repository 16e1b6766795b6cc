//! REST APIハンドラー

/// 監査ログAPI
pub mod audit_log;

/// APIエラーレスポンス型
pub mod error;

use crate::audit::middleware::request_log_middleware;
use crate::AppState;
use axum::{middleware, routing::get, Json, Router};
use serde_json::{json, Value};

/// アプリケーションのルーターを構築する
///
/// 全ルートをリクエストログミドルウェアで包む。
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/audit-logs", get(audit_log::list_audit_logs))
        .route("/api/audit-logs/export", get(audit_log::export_audit_logs))
        .route(
            "/api/audit-logs/archival-preview",
            get(audit_log::archival_preview),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_log_middleware,
        ))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
