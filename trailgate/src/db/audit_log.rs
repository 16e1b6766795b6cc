//! 監査ログストレージ
//!
//! バッチキューの書き込み先であり、検索・エクスポート・保持期間の判定も担う。
//! 読み取り系の操作はキューを経由せず直接テーブルを参照する。

use crate::audit::types::{AuditAction, AuditEntry, AuditFilter, AuditPage, EntityKind};
use crate::common::error::{TrailError, TrailResult};
use crate::queue::BatchSink;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};

/// ページあたり件数のデフォルト
pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// ページあたり件数の上限
pub const MAX_PAGE_LIMIT: i64 = 200;

/// エクスポートの最大行数
pub const MAX_EXPORT_ROWS: i64 = 10_000;

const SELECT_COLUMNS: &str = "SELECT id, actor_id, api_key_id, action, entity_kind, entity_id, \
     metadata, ip_address, user_agent, session_id, duration_ms, created_at FROM audit_logs";

/// 監査ログのDB操作
#[derive(Clone)]
pub struct AuditLogStorage {
    pool: SqlitePool,
    /// 直近に割り当てたcreated_at（プロセス内で単調非減少にする）
    last_created_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

/// sqlx::FromRow用の行構造体
#[derive(Debug, sqlx::FromRow)]
struct AuditLogRow {
    id: i64,
    actor_id: Option<String>,
    api_key_id: Option<String>,
    action: String,
    entity_kind: String,
    entity_id: Option<String>,
    metadata: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    session_id: Option<String>,
    duration_ms: Option<i64>,
    created_at: String,
}

impl TryFrom<AuditLogRow> for AuditEntry {
    type Error = TrailError;

    fn try_from(row: AuditLogRow) -> Result<Self, Self::Error> {
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| TrailError::Database(format!("Failed to parse created_at: {}", e)))?;
        let action = AuditAction::from_str(&row.action)
            .ok_or_else(|| TrailError::Database(format!("Unknown action: {}", row.action)))?;
        let entity_kind = EntityKind::from_str(&row.entity_kind).ok_or_else(|| {
            TrailError::Database(format!("Unknown entity kind: {}", row.entity_kind))
        })?;
        let metadata = serde_json::from_str(&row.metadata)
            .map_err(|e| TrailError::Database(format!("Failed to parse metadata: {}", e)))?;

        Ok(AuditEntry {
            id: Some(row.id),
            actor_id: row.actor_id,
            api_key_id: row.api_key_id,
            action,
            entity_kind,
            entity_id: row.entity_id,
            metadata,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            session_id: row.session_id,
            duration_ms: row.duration_ms,
            created_at: Some(created_at),
        })
    }
}

/// 保持期間のプレビュー結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivalPreview {
    /// 保持日数
    pub retention_days: i64,
    /// この時刻より古いエントリが対象
    pub cutoff: DateTime<Utc>,
    /// 対象件数
    pub count: i64,
}

/// 固定幅のRFC3339（文字列比較で時系列順になる）
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn retention_cutoff(retention_days: i64) -> TrailResult<DateTime<Utc>> {
    if retention_days < 1 {
        return Err(TrailError::Validation(format!(
            "retention_days must be at least 1 (got {})",
            retention_days
        )));
    }
    Duration::try_days(retention_days)
        .and_then(|d| Utc::now().checked_sub_signed(d))
        .ok_or_else(|| {
            TrailError::Validation(format!("retention_days out of range: {}", retention_days))
        })
}

impl AuditLogStorage {
    /// 新しいAuditLogStorageを作成
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            last_created_at: Arc::new(Mutex::new(None)),
        }
    }

    /// 単調非減少な永続化時刻を割り当てる
    fn next_created_at(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.last_created_at.lock() {
            Ok(mut last) => {
                let ts = match *last {
                    Some(prev) if prev > now => prev,
                    _ => now,
                };
                *last = Some(ts);
                ts
            }
            Err(_) => now,
        }
    }

    /// 監査ログを一括挿入（1トランザクション）
    pub async fn insert_batch(&self, entries: &[AuditEntry]) -> TrailResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TrailError::Database(format!("Failed to begin transaction: {}", e)))?;

        for entry in entries {
            let created_at = format_ts(self.next_created_at());
            let metadata = entry.metadata.to_string();

            sqlx::query(
                r#"INSERT INTO audit_logs (
                    actor_id, api_key_id, action, entity_kind, entity_id,
                    metadata, ip_address, user_agent, session_id, duration_ms,
                    created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&entry.actor_id)
            .bind(&entry.api_key_id)
            .bind(entry.action.as_str())
            .bind(entry.entity_kind.as_str())
            .bind(&entry.entity_id)
            .bind(&metadata)
            .bind(&entry.ip_address)
            .bind(&entry.user_agent)
            .bind(&entry.session_id)
            .bind(entry.duration_ms)
            .bind(&created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| TrailError::Database(format!("Failed to insert audit log: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| TrailError::Database(format!("Failed to commit transaction: {}", e)))?;

        Ok(())
    }

    /// フィルタ条件に基づいて監査ログをページ単位で検索（新しい順）
    pub async fn query(&self, filter: &AuditFilter, page: i64, limit: i64) -> TrailResult<AuditPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let offset = (page - 1).saturating_mul(limit);

        let total = self.count(filter).await?;
        let entries = self.fetch(filter, limit, offset).await?;

        Ok(AuditPage {
            entries,
            page,
            limit,
            total,
            page_count: AuditPage::page_count_for(total, limit),
        })
    }

    /// フィルタ条件に一致するエントリを最大 `max_rows` 件取得（新しい順）
    pub async fn export_rows(&self, filter: &AuditFilter, max_rows: i64) -> TrailResult<Vec<AuditEntry>> {
        self.fetch(filter, max_rows.clamp(1, MAX_EXPORT_ROWS), 0)
            .await
    }

    async fn fetch(&self, filter: &AuditFilter, limit: i64, offset: i64) -> TrailResult<Vec<AuditEntry>> {
        let (where_clause, bind_values) = build_where_clause(filter);
        let sql = format!(
            "{} {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        let mut query = sqlx::query_as::<_, AuditLogRow>(&sql);
        for val in &bind_values {
            query = query.bind(val.as_str());
        }
        query = query.bind(limit).bind(offset);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TrailError::Database(format!("Failed to query audit logs: {}", e)))?;

        rows.into_iter()
            .map(AuditEntry::try_from)
            .collect::<Result<Vec<_>, _>>()
    }

    /// フィルタ条件に基づいてレコード数を取得
    pub async fn count(&self, filter: &AuditFilter) -> TrailResult<i64> {
        let (where_clause, bind_values) = build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) as cnt FROM audit_logs {}", where_clause);

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for val in &bind_values {
            query = query.bind(val.as_str());
        }

        query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TrailError::Database(format!("Failed to count audit logs: {}", e)))
    }

    /// 保持期間を過ぎたエントリ数を数える（削除はしない）
    pub async fn preview_archival(&self, retention_days: i64) -> TrailResult<ArchivalPreview> {
        let cutoff = retention_cutoff(retention_days)?;
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM audit_logs WHERE created_at < ?",
        )
        .bind(format_ts(cutoff))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| TrailError::Database(format!("Failed to count expired audit logs: {}", e)))?;

        Ok(ArchivalPreview {
            retention_days,
            cutoff,
            count,
        })
    }

    /// 保持期間を過ぎたエントリを削除する（破壊的操作）
    pub async fn purge_older_than(&self, retention_days: i64) -> TrailResult<u64> {
        let cutoff = retention_cutoff(retention_days)?;
        let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < ?")
            .bind(format_ts(cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| TrailError::Database(format!("Failed to purge audit logs: {}", e)))?;

        tracing::info!(
            retention_days,
            deleted = result.rows_affected(),
            "Purged expired audit logs"
        );
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BatchSink<AuditEntry> for AuditLogStorage {
    async fn write_batch(&self, batch: &[AuditEntry]) -> TrailResult<()> {
        self.insert_batch(batch).await
    }
}

/// フィルタからWHERE句とバインド値を構築する
fn build_where_clause(filter: &AuditFilter) -> (String, Vec<String>) {
    let mut conditions: Vec<&str> = Vec::new();
    let mut bind_values: Vec<String> = Vec::new();

    if let Some(ref actor_id) = filter.actor_id {
        conditions.push("actor_id = ?");
        bind_values.push(actor_id.clone());
    }

    if let Some(entity_kind) = filter.entity_kind {
        conditions.push("entity_kind = ?");
        bind_values.push(entity_kind.as_str().to_string());
    }

    if let Some(ref entity_id) = filter.entity_id {
        conditions.push("entity_id = ?");
        bind_values.push(entity_id.clone());
    }

    if let Some(action) = filter.action {
        conditions.push("action = ?");
        bind_values.push(action.as_str().to_string());
    }

    if let Some(time_from) = filter.time_from {
        conditions.push("created_at >= ?");
        bind_values.push(format_ts(time_from));
    }

    if let Some(time_to) = filter.time_to {
        conditions.push("created_at <= ?");
        bind_values.push(format_ts(time_to));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (where_clause, bind_values)
}
