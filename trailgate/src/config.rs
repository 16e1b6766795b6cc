//! Configuration management via environment variables
//!
//! Provides helper functions for reading environment variables with fallback
//! to deprecated variable names with warning logs, plus the typed settings
//! of the logging pipeline, the batch queues and the monitoring store.

use std::path::PathBuf;
use std::time::Duration;

/// Get an environment variable with fallback to a deprecated name
///
/// If the new variable name is set, returns its value.
/// If only the old (deprecated) variable name is set, returns its value
/// and logs a deprecation warning.
///
/// # Example
/// ```
/// use trailgate::config::get_env_with_fallback;
///
/// let level = get_env_with_fallback("TRAILGATE_LOG_LEVEL", "LOG_LEVEL");
/// ```
pub fn get_env_with_fallback(new_name: &str, old_name: &str) -> Option<String> {
    if let Ok(val) = std::env::var(new_name) {
        return Some(val);
    }
    if let Ok(val) = std::env::var(old_name) {
        tracing::warn!(
            "Environment variable '{}' is deprecated, use '{}' instead",
            old_name,
            new_name
        );
        return Some(val);
    }
    None
}

/// Get an environment variable with fallback and default value
pub fn get_env_with_fallback_or(new_name: &str, old_name: &str, default: &str) -> String {
    get_env_with_fallback(new_name, old_name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable with fallback, parsing to a specific type
///
/// Returns `default` if neither is set or parsing fails.
pub fn get_env_with_fallback_parse<T: std::str::FromStr>(
    new_name: &str,
    old_name: &str,
    default: T,
) -> T {
    get_env_with_fallback(new_name, old_name)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// 環境変数を取得する（未設定ならデフォルト）
pub fn get_env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// 環境変数を指定の型で取得する
///
/// 未設定または解釈できない場合は `default`。
pub fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// カンマ区切りの環境変数をリストとして取得する
///
/// 未設定または空要素のみの場合は `None`。
pub fn get_env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// データベースURL（デフォルト: `sqlite:trailgate.db`）
pub fn database_url() -> String {
    get_env_with_fallback_or("TRAILGATE_DATABASE_URL", "DATABASE_URL", "sqlite:trailgate.db")
}

/// ログ出力設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// ログレベル（EnvFilter形式）
    pub level: String,
    /// ログファイル出力ディレクトリ
    pub dir: PathBuf,
    /// 1ファイルあたりの最大サイズ（バイト）
    pub max_file_bytes: u64,
    /// 保持日数（日次ローテーションのファイル数上限）
    pub retention_days: usize,
    /// コンソール出力をカラー化するか
    pub ansi: bool,
    /// マスク対象キー断片（未設定ならデフォルトリスト）
    pub redact_keys: Option<Vec<String>>,
    /// リクエストログの除外パス（正規表現、未設定ならデフォルトリスト）
    pub exclude_patterns: Option<Vec<String>>,
}

impl LoggingConfig {
    /// Load logging configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            level: get_env_with_fallback_or("TRAILGATE_LOG_LEVEL", "LOG_LEVEL", "info"),
            dir: PathBuf::from(get_env_with_fallback_or(
                "TRAILGATE_LOG_DIR",
                "LOG_DIR",
                "logs",
            )),
            max_file_bytes: get_env_with_fallback_parse(
                "TRAILGATE_LOG_MAX_FILE_BYTES",
                "LOG_MAX_FILE_BYTES",
                20 * 1024 * 1024,
            ),
            retention_days: get_env_with_fallback_parse(
                "TRAILGATE_LOG_RETENTION_DAYS",
                "LOG_RETENTION_DAYS",
                14usize,
            )
            .max(1),
            ansi: !matches!(
                std::env::var("NO_COLOR").ok().as_deref(),
                Some(v) if !v.is_empty()
            ),
            redact_keys: get_env_list("TRAILGATE_LOG_REDACT_KEYS"),
            exclude_patterns: get_env_list("TRAILGATE_LOG_EXCLUDE_PATTERNS"),
        }
    }
}

/// バッチキュー設定（バッチサイズとフラッシュ間隔）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// 1回のフラッシュで書き込む最大件数
    pub batch_size: usize,
    /// 定期フラッシュ間隔
    pub flush_interval: Duration,
}

impl QueueSettings {
    /// 監査ログキュー設定（デフォルト: 10件 / 5秒）
    pub fn audit_from_env() -> Self {
        Self::from_env_with("TRAILGATE_AUDIT", 10, 5_000)
    }

    /// メトリクスキュー設定（デフォルト: 100件 / 10秒）
    pub fn metrics_from_env() -> Self {
        Self::from_env_with("TRAILGATE_METRICS", 100, 10_000)
    }

    fn from_env_with(prefix: &str, batch_size: usize, interval_ms: u64) -> Self {
        let batch_size = std::env::var(format!("{prefix}_BATCH_SIZE"))
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &usize| *v > 0)
            .unwrap_or(batch_size);
        let interval_ms = std::env::var(format!("{prefix}_FLUSH_INTERVAL_MS"))
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &u64| *v > 0)
            .unwrap_or(interval_ms);
        Self {
            batch_size,
            flush_interval: Duration::from_millis(interval_ms),
        }
    }
}

/// 監視ストア（セカンダリメトリクス）設定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitoringConfig {
    /// 接続文字列。未設定ならメトリクス転送は無効
    pub database_url: Option<String>,
    /// キュー設定
    pub queue: Option<QueueSettings>,
}

impl MonitoringConfig {
    /// Load monitoring configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url = get_env_with_fallback(
            "TRAILGATE_MONITORING_DATABASE_URL",
            "MONITORING_DATABASE_URL",
        )
        .filter(|url| !url.trim().is_empty());
        Self {
            database_url,
            queue: Some(QueueSettings::metrics_from_env()),
        }
    }
}
