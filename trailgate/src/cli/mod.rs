//! CLI module for trailgate
//!
//! サーバー起動と監査ログの運用コマンドを提供します。

/// api-key サブコマンド
pub mod apikey;
/// audit サブコマンド
pub mod audit;
/// serve サブコマンド
pub mod serve;

use clap::{Parser, Subcommand};

/// trailgate - Audit trail and request logging pipeline
#[derive(Parser, Debug)]
#[command(name = "trailgate")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    TRAILGATE_HOST                  Bind address (default: 0.0.0.0)
    TRAILGATE_PORT                  Listen port (default: 8080)
    TRAILGATE_DATABASE_URL          Database URL (default: sqlite:trailgate.db)
    TRAILGATE_LOG_LEVEL             Log level (default: info)
    TRAILGATE_LOG_DIR               Log file directory (default: logs)
    TRAILGATE_LOG_MAX_FILE_BYTES    Max bytes per daily log file (default: 20MiB)
    TRAILGATE_LOG_RETENTION_DAYS    Daily log files to keep (default: 14)
    TRAILGATE_LOG_REDACT_KEYS       Comma separated sensitive key fragments
    TRAILGATE_LOG_EXCLUDE_PATTERNS  Comma separated path regexes to skip
    TRAILGATE_AUDIT_BATCH_SIZE      Audit queue batch size (default: 10)
    TRAILGATE_AUDIT_FLUSH_INTERVAL_MS  Audit queue flush interval (default: 5000)
    TRAILGATE_MONITORING_DATABASE_URL  Secondary metrics store (disabled if unset)
    TRAILGATE_METRICS_BATCH_SIZE    Metrics queue batch size (default: 100)
    TRAILGATE_METRICS_FLUSH_INTERVAL_MS  Metrics queue flush interval (default: 10000)
"#)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve(serve::ServeArgs),
    /// Audit log maintenance (archival preview, purge, export)
    Audit(audit::AuditArgs),
    /// API key management
    #[command(name = "api-key")]
    ApiKey(apikey::ApiKeyArgs),
}
