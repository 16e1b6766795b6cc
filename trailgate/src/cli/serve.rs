//! serve サブコマンド
//!
//! HTTPサーバーを起動します。停止シグナル受信後は各キューを排出してから終了します。

use crate::config::{self, LoggingConfig, MonitoringConfig, QueueSettings};
use crate::monitoring::MetricsForwarder;
use crate::{db, server};
use anyhow::Context;
use clap::Args;
use tracing::info;

/// serve サブコマンドの引数
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Listen port
    #[arg(short, long, default_value = "8080", env = "TRAILGATE_PORT")]
    pub port: u16,

    /// Bind address
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "TRAILGATE_HOST")]
    pub host: String,
}

impl ServeArgs {
    /// サブコマンド省略時の引数（環境変数から）
    pub fn from_env() -> Self {
        Self {
            port: config::get_env_parse("TRAILGATE_PORT", 8080),
            host: config::get_env_or("TRAILGATE_HOST", "0.0.0.0"),
        }
    }
}

/// serve コマンドを実行
pub async fn execute(args: &ServeArgs, logging: &LoggingConfig) -> Result<(), anyhow::Error> {
    let database_url = config::database_url();
    info!("Opening database {}", database_url);
    let pool = db::initialize_database(&database_url)
        .await
        .context("Failed to initialize database")?;

    let metrics = MetricsForwarder::from_config(&MonitoringConfig::from_env()).await;
    let state = server::build_state(pool, logging, QueueSettings::audit_from_env(), metrics)
        .context("Failed to build application state")?;

    server::run(&args.host, args.port, state).await
}
