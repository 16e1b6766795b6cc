//! 監査ログAPIハンドラー
//!
//! `/api/audit-logs` 系のエンドポイント。読み取りはキューを経由せずストレージを直接参照する。

use super::error::AppError;
use crate::audit::context::{RequestContext, ResolvedActor};
use crate::audit::export::{self, ExportFormat};
use crate::audit::types::{
    AuditAction, AuditDescriptor, AuditFilter, AuditPage, EntityKind,
};
use crate::common::error::TrailError;
use crate::db::audit_log::{ArchivalPreview, DEFAULT_PAGE_LIMIT, MAX_EXPORT_ROWS};
use crate::AppState;
use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

/// 保持日数のデフォルト
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// 監査ログ検索のクエリパラメータ
#[derive(Debug, Default, Deserialize)]
pub struct AuditLogQueryParams {
    /// 実行ユーザーIDでフィルタ
    pub actor_id: Option<String>,
    /// エンティティ種別でフィルタ
    pub entity_kind: Option<String>,
    /// エンティティIDでフィルタ
    pub entity_id: Option<String>,
    /// アクションでフィルタ
    pub action: Option<String>,
    /// 開始日時
    pub time_from: Option<DateTime<Utc>>,
    /// 終了日時
    pub time_to: Option<DateTime<Utc>>,
    /// ページ番号（1始まり、デフォルト: 1）
    pub page: Option<i64>,
    /// ページあたり件数（デフォルト: 50）
    pub limit: Option<i64>,
    /// エクスポート形式（json / csv）
    pub format: Option<String>,
}

impl TryFrom<&AuditLogQueryParams> for AuditFilter {
    type Error = TrailError;

    fn try_from(params: &AuditLogQueryParams) -> Result<Self, Self::Error> {
        let entity_kind = params
            .entity_kind
            .as_deref()
            .map(|s| {
                EntityKind::from_str(s)
                    .ok_or_else(|| TrailError::Validation(format!("Unknown entity_kind: {}", s)))
            })
            .transpose()?;
        let action = params
            .action
            .as_deref()
            .map(|s| {
                AuditAction::from_str(s)
                    .ok_or_else(|| TrailError::Validation(format!("Unknown action: {}", s)))
            })
            .transpose()?;

        Ok(Self {
            actor_id: params.actor_id.clone(),
            entity_kind,
            entity_id: params.entity_id.clone(),
            action,
            time_from: params.time_from,
            time_to: params.time_to,
        })
    }
}

/// 保持期間プレビューのクエリパラメータ
#[derive(Debug, Default, Deserialize)]
pub struct ArchivalPreviewParams {
    /// 保持日数（デフォルト: 90）
    pub retention_days: Option<i64>,
}

/// インターセプタが解決した識別情報を取り出す（除外パスでは未設定）
fn resolved(actor: Option<Extension<ResolvedActor>>) -> ResolvedActor {
    actor.map(|Extension(a)| a).unwrap_or(ResolvedActor::Anonymous)
}

fn require_identity(actor: &ResolvedActor) -> Result<(), AppError> {
    match actor {
        ResolvedActor::ApiKey { .. } | ResolvedActor::Session { .. } => Ok(()),
        ResolvedActor::InvalidApiKey => {
            Err(TrailError::Authentication("invalid API key".to_string()).into())
        }
        ResolvedActor::Anonymous => {
            Err(TrailError::Authentication("no credentials".to_string()).into())
        }
    }
}

/// GET /api/audit-logs - 監査ログ一覧（新しい順）
pub async fn list_audit_logs(
    State(state): State<AppState>,
    actor: Option<Extension<ResolvedActor>>,
    Query(params): Query<AuditLogQueryParams>,
) -> Result<Json<AuditPage>, AppError> {
    require_identity(&resolved(actor))?;
    let filter = AuditFilter::try_from(&params)?;
    let page = state
        .audit_log_storage
        .query(
            &filter,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )
        .await?;
    Ok(Json(page))
}

/// GET /api/audit-logs/export - 監査ログのエクスポート（JSON / CSV）
pub async fn export_audit_logs(
    State(state): State<AppState>,
    actor: Option<Extension<ResolvedActor>>,
    context: Option<Extension<RequestContext>>,
    Query(params): Query<AuditLogQueryParams>,
) -> Result<Response, AppError> {
    require_identity(&resolved(actor))?;
    let context = context.map(|Extension(c)| c);
    let filter = AuditFilter::try_from(&params)?;
    let format = match params.format.as_deref() {
        Some(f) => f.parse::<ExportFormat>()?,
        None => ExportFormat::default(),
    };

    let entries = state
        .audit_log_storage
        .export_rows(&filter, MAX_EXPORT_ROWS)
        .await?;
    let body = export::render(&entries, format)?;

    state.audit_recorder.record(
        AuditDescriptor::new(AuditAction::DataExport, EntityKind::System).metadata(json!({
            "format": format.extension(),
            "rows": entries.len(),
        })),
        context.as_ref(),
    );

    let disposition = format!(
        "attachment; filename=\"audit-logs-{}.{}\"",
        Utc::now().format("%Y%m%d%H%M%S"),
        format.extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// GET /api/audit-logs/archival-preview - 保持期間切れの件数（削除はしない）
pub async fn archival_preview(
    State(state): State<AppState>,
    actor: Option<Extension<ResolvedActor>>,
    Query(params): Query<ArchivalPreviewParams>,
) -> Result<Json<ArchivalPreview>, AppError> {
    require_identity(&resolved(actor))?;
    let preview = state
        .audit_log_storage
        .preview_archival(params.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS))
        .await?;
    Ok(Json(preview))
}
