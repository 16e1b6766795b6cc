//! audit サブコマンド
//!
//! 保持期間を過ぎた監査ログの確認・削除と、ファイルへのエクスポートを行います。

use crate::audit::export::{self, ExportFormat};
use crate::audit::types::{AuditAction, AuditFilter, EntityKind};
use crate::db::audit_log::{AuditLogStorage, MAX_EXPORT_ROWS};
use crate::{config, db};
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use std::io::Write;
use std::path::PathBuf;

/// audit サブコマンドの引数
#[derive(Args, Debug, Clone)]
pub struct AuditArgs {
    /// 実行する操作
    #[command(subcommand)]
    pub command: AuditCommand,
}

/// audit の操作
#[derive(Subcommand, Debug, Clone)]
pub enum AuditCommand {
    /// Count entries older than the retention period
    PreviewArchival {
        /// Retention period in days
        #[arg(long, default_value = "90")]
        retention_days: i64,
    },
    /// Delete entries older than the retention period
    Purge {
        /// Retention period in days
        #[arg(long)]
        retention_days: i64,
        /// Actually delete (without this flag only the count is shown)
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
    /// Export entries as JSON or CSV
    Export {
        /// Output format (json or csv)
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Filter by actor ID
        #[arg(long)]
        actor_id: Option<String>,
        /// Filter by entity kind (e.g. user, resource)
        #[arg(long)]
        entity_kind: Option<String>,
        /// Filter by entity ID
        #[arg(long)]
        entity_id: Option<String>,
        /// Filter by action (e.g. auth_login)
        #[arg(long)]
        action: Option<String>,
        /// Only entries at or after this RFC3339 time
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Only entries at or before this RFC3339 time
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },
}

/// audit コマンドを実行
pub async fn execute(args: &AuditArgs) -> Result<(), anyhow::Error> {
    let pool = db::initialize_database(&config::database_url())
        .await
        .context("Failed to initialize database")?;
    let storage = AuditLogStorage::new(pool);
    run(&args.command, &storage, &mut std::io::stdout()).await
}

async fn run(
    command: &AuditCommand,
    storage: &AuditLogStorage,
    out: &mut dyn Write,
) -> Result<(), anyhow::Error> {
    match command {
        AuditCommand::PreviewArchival { retention_days } => {
            let preview = storage.preview_archival(*retention_days).await?;
            writeln!(
                out,
                "{} entries older than {} days (before {})",
                preview.count,
                preview.retention_days,
                preview.cutoff.to_rfc3339()
            )?;
        }
        AuditCommand::Purge {
            retention_days,
            confirm,
        } => {
            let preview = storage.preview_archival(*retention_days).await?;
            if !confirm {
                writeln!(
                    out,
                    "{} entries would be deleted (before {})",
                    preview.count,
                    preview.cutoff.to_rfc3339()
                )?;
                bail!("Refusing to purge without --confirm");
            }
            let deleted = storage.purge_older_than(*retention_days).await?;
            writeln!(out, "Deleted {} entries", deleted)?;
        }
        AuditCommand::Export {
            format,
            output,
            actor_id,
            entity_kind,
            entity_id,
            action,
            since,
            until,
        } => {
            let filter = AuditFilter {
                actor_id: actor_id.clone(),
                entity_kind: match entity_kind.as_deref() {
                    Some(s) => Some(
                        EntityKind::from_str(s)
                            .with_context(|| format!("Unknown entity kind: {}", s))?,
                    ),
                    None => None,
                },
                entity_id: entity_id.clone(),
                action: match action.as_deref() {
                    Some(s) => Some(
                        AuditAction::from_str(s)
                            .with_context(|| format!("Unknown action: {}", s))?,
                    ),
                    None => None,
                },
                time_from: *since,
                time_to: *until,
            };
            let entries = storage.export_rows(&filter, MAX_EXPORT_ROWS).await?;
            let body = export::render(&entries, *format)?;
            match output {
                Some(path) => {
                    std::fs::write(path, &body)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    writeln!(out, "Exported {} entries to {}", entries.len(), path.display())?;
                }
                None => out.write_all(&body)?,
            }
        }
    }
    Ok(())
}
