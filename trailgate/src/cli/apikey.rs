//! api-key サブコマンド
//!
//! 監査APIにアクセスするためのAPIキーを発行・失効させます。
//! 操作自体も監査ログに記録します（アクターは `cli`）。

use crate::audit::types::{AuditAction, AuditEntry, EntityKind};
use crate::db::audit_log::AuditLogStorage;
use crate::db::identity::SqliteIdentityResolver;
use crate::{config, db};
use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Args, Subcommand};
use serde_json::json;
use std::io::Write;

/// CLI操作の監査アクターID
pub const CLI_ACTOR: &str = "cli";

/// api-key サブコマンドの引数
#[derive(Args, Debug, Clone)]
pub struct ApiKeyArgs {
    /// 実行する操作
    #[command(subcommand)]
    pub command: ApiKeyCommand,
}

/// api-key の操作
#[derive(Subcommand, Debug, Clone)]
pub enum ApiKeyCommand {
    /// Issue a new API key (the plaintext key is printed once)
    Issue {
        /// Display name
        #[arg(long)]
        name: String,
        /// Owner user ID
        #[arg(long)]
        owner: Option<String>,
        /// Expire after this many days
        #[arg(long)]
        expires_in_days: Option<i64>,
    },
    /// Revoke an API key by ID
    Revoke {
        /// API key ID
        id: String,
    },
}

/// api-key コマンドを実行
pub async fn execute(args: &ApiKeyArgs) -> Result<(), anyhow::Error> {
    let pool = db::initialize_database(&config::database_url())
        .await
        .context("Failed to initialize database")?;
    let resolver = SqliteIdentityResolver::new(pool.clone());
    let storage = AuditLogStorage::new(pool);
    run(&args.command, &resolver, &storage, &mut std::io::stdout()).await
}

async fn run(
    command: &ApiKeyCommand,
    resolver: &SqliteIdentityResolver,
    storage: &AuditLogStorage,
    out: &mut dyn Write,
) -> Result<(), anyhow::Error> {
    let mut entry = match command {
        ApiKeyCommand::Issue {
            name,
            owner,
            expires_in_days,
        } => {
            let expires_at = expires_in_days.map(|days| Utc::now() + Duration::days(days));
            let issued = resolver
                .issue_api_key(name, owner.as_deref(), expires_at)
                .await?;
            writeln!(out, "id:  {}", issued.id)?;
            writeln!(out, "key: {}", issued.key)?;

            let mut entry = AuditEntry::new(AuditAction::ApiKeyCreate, EntityKind::ApiKey);
            entry.entity_id = Some(issued.id);
            entry.metadata = json!({"name": name, "owner_id": owner});
            entry
        }
        ApiKeyCommand::Revoke { id } => {
            resolver.revoke_api_key(id).await?;
            writeln!(out, "Revoked {}", id)?;

            let mut entry = AuditEntry::new(AuditAction::ApiKeyRevoke, EntityKind::ApiKey);
            entry.entity_id = Some(id.clone());
            entry
        }
    };
    entry.actor_id = Some(CLI_ACTOR.to_string());
    storage.insert_batch(&[entry]).await?;
    Ok(())
}
