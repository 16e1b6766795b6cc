//! データベースアクセス層
//!
//! SQLiteベースのデータ永続化

/// 監査ログストレージ
pub mod audit_log;

/// 識別情報（APIキー・セッション）の解決
pub mod identity;

use crate::common::error::{TrailError, TrailResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// 接続プールを作成してマイグレーションを実行する
///
/// データベースファイルが無ければ作成する。
pub async fn initialize_database(database_url: &str) -> TrailResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| TrailError::Configuration(format!("Invalid database URL: {}", e)))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .map_err(|e| TrailError::Database(format!("Failed to connect to database: {}", e)))?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// マイグレーションを実行
pub async fn run_migrations(pool: &SqlitePool) -> TrailResult<()> {
    tracing::info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| TrailError::Database(format!("Failed to run migrations: {}", e)))?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
