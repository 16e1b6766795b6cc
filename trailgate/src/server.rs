//! サーバーの組み立てと停止
//!
//! 監査キュー・メトリクス転送・識別情報リゾルバを組み立ててHTTPサーバーを起動し、
//! 停止時は受付を止めてから各キューを排出する。

use crate::api;
use crate::audit::middleware::ExclusionRules;
use crate::audit::recorder::AuditRecorder;
use crate::audit::types::AuditEntry;
use crate::common::error::TrailResult;
use crate::config::{LoggingConfig, QueueSettings};
use crate::db::audit_log::AuditLogStorage;
use crate::db::identity::SqliteIdentityResolver;
use crate::logging::RequestLogger;
use crate::monitoring::MetricsForwarder;
use crate::queue::{BatchQueue, BatchQueueConfig};
use crate::AppState;
use anyhow::Context;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, info};

/// アプリケーション状態を組み立てる（tokioランタイム内で呼ぶこと）
pub fn build_state(
    pool: SqlitePool,
    logging: &LoggingConfig,
    audit_queue: QueueSettings,
    metrics: MetricsForwarder,
) -> TrailResult<AppState> {
    let storage = Arc::new(AuditLogStorage::new(pool.clone()));
    let queue: BatchQueue<AuditEntry> =
        BatchQueue::new("audit", storage.clone(), BatchQueueConfig::from(audit_queue));

    let request_logger = RequestLogger::from_config(logging);
    let audit_recorder = AuditRecorder::new(queue, request_logger.redactor().clone());
    let exclusions = Arc::new(ExclusionRules::from_config(logging)?);

    Ok(AppState {
        audit_log_storage: storage,
        audit_recorder,
        request_logger,
        exclusions,
        identity: Some(Arc::new(SqliteIdentityResolver::new(pool))),
        metrics,
    })
}

/// 監査キューとメトリクスキューを停止し、残りを排出する
///
/// 監査キューの最終カウンタはメトリクスとして転送してから排出する。
pub async fn drain(state: &AppState) {
    let queue = state.audit_recorder.queue();
    queue.shutdown().await;

    let stats = queue.stats();
    let tags = Some(json!({"queue": queue.name()}));
    state
        .metrics
        .record_metric("queue.written", stats.written as f64, Some("entries"), tags.clone());
    state.metrics.record_metric(
        "queue.dropped_failed",
        stats.dropped_failed as f64,
        Some("entries"),
        tags.clone(),
    );
    state.metrics.record_metric(
        "queue.dropped_overflow",
        stats.dropped_overflow as f64,
        Some("entries"),
        tags.clone(),
    );
    state.metrics.record_metric(
        "queue.rejected_closed",
        stats.rejected_closed as f64,
        Some("entries"),
        tags,
    );
    state.metrics.shutdown().await;

    info!(
        written = stats.written,
        dropped_failed = stats.dropped_failed,
        dropped_overflow = stats.dropped_overflow,
        rejected_closed = stats.rejected_closed,
        "Audit queue drained"
    );
}

/// HTTPサーバーを起動し、停止シグナルまで待つ
pub async fn run(host: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let app = api::create_app(state.clone());
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("trailgate listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    drain(&state).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
