//! セカンダリメトリクス転送
//!
//! 監視ストアの接続文字列が設定されている場合のみ有効になる。
//! 起動時に1回だけ判定し、未設定なら全操作が何もしないインスタンスを返す。
//! トレースとメトリクスはそれぞれ独立したバッチキューを持ち、
//! 監査ログキューとバッファやフラッシュロックを共有しない。

/// 監視ストア
pub mod store;

use crate::config::{MonitoringConfig, QueueSettings};
use crate::queue::{BatchQueue, BatchQueueConfig, QueueStats};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use store::{MetricRow, MetricSink, MonitoringStore, SqliteMonitoringStore, TraceRow, TraceSink};
use tracing::{info, warn};

struct ActiveForwarder {
    traces: BatchQueue<TraceRow>,
    metrics: BatchQueue<MetricRow>,
}

/// セカンダリメトリクス転送
#[derive(Clone, Default)]
pub struct MetricsForwarder {
    active: Option<Arc<ActiveForwarder>>,
}

impl std::fmt::Debug for MetricsForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsForwarder")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl MetricsForwarder {
    /// 無効なインスタンス
    pub fn disabled() -> Self {
        Self::default()
    }

    /// ストアを指定して有効なインスタンスを作成（tokioランタイム内で呼ぶこと）
    pub fn with_store(store: Arc<dyn MonitoringStore>, settings: QueueSettings) -> Self {
        let config = BatchQueueConfig::from(settings);
        let traces: BatchQueue<TraceRow> =
            BatchQueue::new("traces", Arc::new(TraceSink(store.clone())), config);
        let metrics: BatchQueue<MetricRow> =
            BatchQueue::new("metrics", Arc::new(MetricSink(store)), config);
        Self {
            active: Some(Arc::new(ActiveForwarder { traces, metrics })),
        }
    }

    /// 設定から作成する
    ///
    /// 接続文字列が未設定なら無効。接続に失敗した場合も警告を出して無効にする。
    pub async fn from_config(config: &MonitoringConfig) -> Self {
        let Some(url) = config.database_url.as_deref() else {
            info!("Monitoring store not configured, metrics forwarding disabled");
            return Self::disabled();
        };

        match SqliteMonitoringStore::connect(url).await {
            Ok(store) => {
                let settings = config
                    .queue
                    .unwrap_or_else(QueueSettings::metrics_from_env);
                info!(
                    batch_size = settings.batch_size,
                    flush_interval_ms = settings.flush_interval.as_millis() as u64,
                    "Metrics forwarding enabled"
                );
                Self::with_store(Arc::new(store), settings)
            }
            Err(e) => {
                warn!("Failed to connect monitoring store, metrics forwarding disabled: {}", e);
                Self::disabled()
            }
        }
    }

    /// 有効かどうか
    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    /// リクエストトレースを記録する
    pub fn record_trace(&self, trace: TraceRow) {
        if let Some(active) = &self.active {
            active.traces.enqueue(trace);
        }
    }

    /// メトリクスを記録する
    pub fn record_metric(&self, name: &str, value: f64, unit: Option<&str>, tags: Option<Value>) {
        if let Some(active) = &self.active {
            active.metrics.enqueue(MetricRow {
                name: name.to_string(),
                value,
                unit: unit.map(str::to_string),
                tags,
                recorded_at: Utc::now(),
            });
        }
    }

    /// キューの累計カウンタ（traces, metrics）
    pub fn stats(&self) -> Option<(QueueStats, QueueStats)> {
        self.active
            .as_ref()
            .map(|a| (a.traces.stats(), a.metrics.stats()))
    }

    /// 両キューを停止し残りをフラッシュする
    pub async fn shutdown(&self) {
        if let Some(active) = &self.active {
            active.traces.shutdown().await;
            active.metrics.shutdown().await;
        }
    }
}
