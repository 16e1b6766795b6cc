//! 監視ストア
//!
//! `request_traces` と `app_metrics` の追記専用テーブルを持つSQLiteデータベース。

use crate::common::error::{TrailError, TrailResult};
use crate::queue::BatchSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

/// リクエストトレース1件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRow {
    /// HTTPメソッド
    pub method: String,
    /// リクエストURI
    pub uri: String,
    /// HTTPステータス
    pub status: u16,
    /// 処理時間（ミリ秒）
    pub elapsed_ms: u64,
    /// アクターID
    pub actor_id: Option<String>,
    /// 記録時刻
    pub recorded_at: DateTime<Utc>,
}

/// アプリケーションメトリクス1件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    /// メトリクス名
    pub name: String,
    /// 値
    pub value: f64,
    /// 単位
    pub unit: Option<String>,
    /// タグ（JSONオブジェクト）
    pub tags: Option<Value>,
    /// 記録時刻
    pub recorded_at: DateTime<Utc>,
}

/// 監視ストアの書き込みインターフェース
#[async_trait]
pub trait MonitoringStore: Send + Sync + 'static {
    /// トレースを一括挿入
    async fn insert_traces(&self, rows: &[TraceRow]) -> TrailResult<()>;

    /// メトリクスを一括挿入
    async fn insert_metrics(&self, rows: &[MetricRow]) -> TrailResult<()>;
}

/// SQLite実装
#[derive(Clone)]
pub struct SqliteMonitoringStore {
    pool: SqlitePool,
}

impl SqliteMonitoringStore {
    /// 接続し、必要なテーブルを作成する
    pub async fn connect(url: &str) -> TrailResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| TrailError::Configuration(format!("Invalid monitoring URL: {}", e)))?
            .create_if_missing(true);
        // インメモリDBは接続ごとに別DBになるため1接続に固定
        let max_connections = if url.contains(":memory:") { 1 } else { 2 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| TrailError::Database(format!("Failed to open monitoring store: {}", e)))?;
        Self::from_pool(pool).await
    }

    /// 既存プールから作成し、必要なテーブルを作成する
    pub async fn from_pool(pool: SqlitePool) -> TrailResult<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS request_traces (
                id INTEGER PRIMARY KEY,
                method TEXT NOT NULL,
                uri TEXT NOT NULL,
                status INTEGER NOT NULL,
                elapsed_ms INTEGER NOT NULL,
                actor_id TEXT,
                recorded_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| TrailError::Database(format!("Failed to create request_traces: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS app_metrics (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                value REAL NOT NULL,
                unit TEXT,
                tags TEXT,
                recorded_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| TrailError::Database(format!("Failed to create app_metrics: {}", e)))?;

        Ok(Self { pool })
    }

    /// プールへの参照
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl MonitoringStore for SqliteMonitoringStore {
    async fn insert_traces(&self, rows: &[TraceRow]) -> TrailResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO request_traces (method, uri, status, elapsed_ms, actor_id, recorded_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.method)
            .bind(&row.uri)
            .bind(row.status as i64)
            .bind(row.elapsed_ms as i64)
            .bind(&row.actor_id)
            .bind(row.recorded_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| TrailError::Database(format!("Failed to insert trace: {}", e)))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_metrics(&self, rows: &[MetricRow]) -> TrailResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            let tags = row.tags.as_ref().map(|t| t.to_string());
            sqlx::query(
                "INSERT INTO app_metrics (name, value, unit, tags, recorded_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&row.name)
            .bind(row.value)
            .bind(&row.unit)
            .bind(tags)
            .bind(row.recorded_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| TrailError::Database(format!("Failed to insert metric: {}", e)))?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// トレースキュー用の書き込み先
pub(crate) struct TraceSink(pub Arc<dyn MonitoringStore>);

#[async_trait]
impl BatchSink<TraceRow> for TraceSink {
    async fn write_batch(&self, batch: &[TraceRow]) -> TrailResult<()> {
        self.0.insert_traces(batch).await
    }
}

/// メトリクスキュー用の書き込み先
pub(crate) struct MetricSink(pub Arc<dyn MonitoringStore>);

#[async_trait]
impl BatchSink<MetricRow> for MetricSink {
    async fn write_batch(&self, batch: &[MetricRow]) -> TrailResult<()> {
        self.0.insert_metrics(batch).await
    }
}
