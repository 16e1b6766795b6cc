//! テスト共通ヘルパー

#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trailgate::common::error::{TrailError, TrailResult};
use trailgate::config::{LoggingConfig, QueueSettings};
use trailgate::monitoring::store::{MetricRow, MonitoringStore, TraceRow};
use trailgate::monitoring::MetricsForwarder;
use trailgate::queue::BatchSink;
use trailgate::{server, AppState};

/// マイグレーション済みのインメモリDBプール
pub async fn create_test_db_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Failed to create test database");
    trailgate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// ファイル出力を伴わないログ設定
pub fn test_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: "info".to_string(),
        dir: std::env::temp_dir(),
        max_file_bytes: 1024 * 1024,
        retention_days: 1,
        ansi: false,
        redact_keys: None,
        exclude_patterns: None,
    }
}

/// 定期フラッシュが発火しない監査キュー設定
pub fn manual_flush_settings() -> QueueSettings {
    QueueSettings {
        batch_size: 10,
        flush_interval: Duration::from_secs(3600),
    }
}

/// テスト用のアプリケーション状態
pub async fn build_test_state(metrics: MetricsForwarder) -> (AppState, SqlitePool) {
    let pool = create_test_db_pool().await;
    let state = server::build_state(
        pool.clone(),
        &test_logging_config(),
        manual_flush_settings(),
        metrics,
    )
    .expect("Failed to build state");
    (state, pool)
}

/// 受け取ったバッチを記録するシンク
///
/// `fail_first` 回までの書き込みは失敗させる。
pub struct RecordingSink<T> {
    pub batches: Mutex<Vec<Vec<T>>>,
    pub calls: AtomicUsize,
    pub fail_first: usize,
    pub delay: Option<Duration>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl<T> RecordingSink<T> {
    pub fn new() -> Self {
        Self::with_failures(0)
    }

    pub fn with_failures(fail_first: usize) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_first,
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(|b| b.len()).collect()
    }

    pub fn total(&self) -> usize {
        self.batch_sizes().iter().sum()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> BatchSink<T> for RecordingSink<T> {
    async fn write_batch(&self, batch: &[T]) -> TrailResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(TrailError::Database("backend unavailable".to_string()));
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}

/// メモリ上の監視ストア
#[derive(Default)]
pub struct MemoryMonitoringStore {
    pub traces: Mutex<Vec<TraceRow>>,
    pub metrics: Mutex<Vec<MetricRow>>,
}

#[async_trait]
impl MonitoringStore for MemoryMonitoringStore {
    async fn insert_traces(&self, rows: &[TraceRow]) -> TrailResult<()> {
        self.traces.lock().unwrap().extend_from_slice(rows);
        Ok(())
    }

    async fn insert_metrics(&self, rows: &[MetricRow]) -> TrailResult<()> {
        self.metrics.lock().unwrap().extend_from_slice(rows);
        Ok(())
    }
}

/// 出力をメモリに溜めるライター
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Capture {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// JSON Lines出力のうち、リクエストログのレコードだけを返す
    pub fn request_records(&self) -> Vec<serde_json::Value> {
        self.contents()
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter(|v| v["target"] == trailgate::logging::REQUEST_LOG_TARGET)
            .collect()
    }

    /// このスレッドのデフォルトsubscriberとして登録する
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}
