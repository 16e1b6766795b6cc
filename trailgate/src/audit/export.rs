//! 監査ログのエクスポート
//!
//! JSONはエントリ配列をそのまま、CSVはヘッダー行と全フィールドを引用符で囲んだ行を出力する。
//! `metadata` はCSVの1フィールドにJSON文字列として埋め込む。

use crate::audit::types::AuditEntry;
use crate::common::error::{TrailError, TrailResult};
use serde::{Deserialize, Serialize};

/// エクスポート形式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// JSON配列
    #[default]
    Json,
    /// CSV
    Csv,
}

impl ExportFormat {
    /// Content-Type
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }

    /// ファイル拡張子
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = TrailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(TrailError::Validation(format!(
                "Unsupported export format: {}",
                other
            ))),
        }
    }
}

const CSV_HEADER: [&str; 12] = [
    "id",
    "created_at",
    "actor_id",
    "api_key_id",
    "action",
    "entity_kind",
    "entity_id",
    "ip_address",
    "user_agent",
    "session_id",
    "duration_ms",
    "metadata",
];

/// 指定形式でシリアライズする
pub fn render(entries: &[AuditEntry], format: ExportFormat) -> TrailResult<Vec<u8>> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_vec(entries)?),
        ExportFormat::Csv => to_csv(entries),
    }
}

/// CSVにシリアライズする
pub fn to_csv(entries: &[AuditEntry]) -> TrailResult<Vec<u8>> {
    let csv_err =
        |e: csv::Error| TrailError::Internal(format!("Failed to write CSV: {}", e));

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(vec![]);
    writer.write_record(CSV_HEADER).map_err(csv_err)?;

    for entry in entries {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        writer
            .write_record([
                entry.id.map(|id| id.to_string()).unwrap_or_default(),
                entry
                    .created_at
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_default(),
                opt(&entry.actor_id),
                opt(&entry.api_key_id),
                entry.action.as_str().to_string(),
                entry.entity_kind.as_str().to_string(),
                opt(&entry.entity_id),
                opt(&entry.ip_address),
                opt(&entry.user_agent),
                opt(&entry.session_id),
                entry.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
                entry.metadata.to_string(),
            ])
            .map_err(csv_err)?;
    }

    writer
        .into_inner()
        .map_err(|e| TrailError::Internal(format!("Failed to finalize CSV: {}", e)))
}
