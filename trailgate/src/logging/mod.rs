//! ロギング初期化とリクエストログ出力
//!
//! 出力先（シンク）は3系統:
//! - コンソール（常時有効、カラー、1レコード1行）
//! - 一般ログファイル（JSON Lines、日次ローテーション + サイズ超過時のセグメント切り替え）
//! - エラーログファイル（errorレベルのみ、同じJSONエンコーディング）
//!
//! ファイル出力は `tracing_appender::non_blocking` 経由で行い、
//! 呼び出し側がディスクI/Oで待たされないようにする。

/// 機密フィールドのマスク処理
pub mod redact;

/// ログレコード型
pub mod record;

/// サイズ上限付きファイルライター
pub mod writer;

use crate::common::error::{TrailError, TrailResult};
use crate::config::LoggingConfig;
use record::{LogLevel, LogRecord};
use redact::Redactor;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use writer::SizeCappedWriter;

/// リクエストログのtracingターゲット
pub const REQUEST_LOG_TARGET: &str = "trailgate::request";

/// 一般ログファイルのプレフィックス
pub const GENERAL_LOG_PREFIX: &str = "trailgate";

/// エラーログファイルのプレフィックス
pub const ERROR_LOG_PREFIX: &str = "trailgate-error";

/// ファイル出力ワーカーのガード
///
/// Drop時に未書き込みのレコードをフラッシュする。`main` の終了まで保持すること。
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

fn file_appender(config: &LoggingConfig, prefix: &str) -> TrailResult<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(config.retention_days)
        .build(&config.dir)
        .map_err(|e| {
            TrailError::Configuration(format!(
                "Failed to open log file '{}' in {}: {}",
                prefix,
                config.dir.display(),
                e
            ))
        })
}

/// グローバルsubscriberを初期化する
///
/// 2回目以降の呼び出しはエラーを返す。
pub fn init(config: &LoggingConfig) -> TrailResult<LoggingGuard> {
    std::fs::create_dir_all(&config.dir).map_err(|e| {
        TrailError::Configuration(format!(
            "Failed to create log directory {}: {}",
            config.dir.display(),
            e
        ))
    })?;

    let general = SizeCappedWriter::new(
        file_appender(config, GENERAL_LOG_PREFIX)?,
        &config.dir,
        GENERAL_LOG_PREFIX,
        config.max_file_bytes,
        config.retention_days,
    );
    let errors = SizeCappedWriter::new(
        file_appender(config, ERROR_LOG_PREFIX)?,
        &config.dir,
        ERROR_LOG_PREFIX,
        config.max_file_bytes,
        config.retention_days,
    );
    let (general_writer, general_guard) = tracing_appender::non_blocking(general);
    let (error_writer, error_guard) = tracing_appender::non_blocking(errors);

    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|e| {
        eprintln!("invalid log level '{}': {}; using 'info'", config.level, e);
        EnvFilter::new("info")
    });

    let console_layer = fmt::layer()
        .compact()
        .with_ansi(config.ansi)
        .with_target(false);

    let file_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_ansi(false)
        .with_writer(general_writer);

    let error_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_ansi(false)
        .with_writer(error_writer)
        .with_filter(LevelFilter::ERROR);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .with(error_layer)
        .try_init()
        .map_err(|e| TrailError::Configuration(format!("Failed to install subscriber: {}", e)))?;

    Ok(LoggingGuard {
        _guards: vec![general_guard, error_guard],
    })
}

/// リクエストログの出力口
///
/// レコードのボディ・メタデータをマスクしてからtracingイベントとして出力する。
/// 出力はサブスクライバの各レイヤー（シンク）にファンアウトされる。
#[derive(Debug, Clone, Default)]
pub struct RequestLogger {
    redactor: Arc<Redactor>,
}

macro_rules! emit_request_event {
    ($level:expr, $record:expr, $req:expr, $res:expr, $meta:expr) => {
        tracing::event!(
            target: $crate::logging::REQUEST_LOG_TARGET,
            $level,
            actor_id = $record.actor_id.as_deref(),
            method = $record.method.as_deref(),
            uri = $record.uri.as_deref(),
            status = $record.status,
            elapsed_ms = $record.elapsed_ms,
            request_body = $req.as_deref(),
            response_body = $res.as_deref(),
            metadata = $meta.as_deref(),
            error_name = $record.error.as_ref().map(|e| e.name.as_str()),
            error_message = $record.error.as_ref().map(|e| e.message.as_str()),
            error_stack = $record.error.as_ref().and_then(|e| e.stack.as_deref()),
            "{}",
            $record.message
        )
    };
}

impl RequestLogger {
    /// Redactorを指定して作成
    pub fn new(redactor: Redactor) -> Self {
        Self {
            redactor: Arc::new(redactor),
        }
    }

    /// 設定から作成（マスク対象キー未設定ならデフォルトリスト）
    pub fn from_config(config: &LoggingConfig) -> Self {
        match &config.redact_keys {
            Some(keys) => Self::new(Redactor::new(keys)),
            None => Self::default(),
        }
    }

    /// Redactorを取得
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// マスク済みのレコードを返す
    pub fn prepare(&self, mut record: LogRecord) -> LogRecord {
        record.request_body = record.request_body.map(|v| self.redactor.redact(&v));
        record.response_body = record.response_body.map(|v| self.redactor.redact(&v));
        record.metadata = record.metadata.map(|v| self.redactor.redact(&v));
        record
    }

    /// レコードを出力する
    pub fn emit(&self, record: LogRecord) {
        let record = self.prepare(record);
        let request_body = record.request_body.as_ref().map(|v| v.to_string());
        let response_body = record.response_body.as_ref().map(|v| v.to_string());
        let metadata = record.metadata.as_ref().map(|v| v.to_string());

        match record.level {
            LogLevel::Info => emit_request_event!(
                tracing::Level::INFO,
                record,
                request_body,
                response_body,
                metadata
            ),
            LogLevel::Warn => emit_request_event!(
                tracing::Level::WARN,
                record,
                request_body,
                response_body,
                metadata
            ),
            LogLevel::Error => emit_request_event!(
                tracing::Level::ERROR,
                record,
                request_body,
                response_body,
                metadata
            ),
        }
    }
}
