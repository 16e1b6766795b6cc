//! trailgate Server
//!
//! 監査ログとリクエストログのパイプライン。
//! 操作の記録をバッチキューで非同期に永続化し、ログは機密情報をマスクして出力する。

#![warn(missing_docs)]

/// 共通型定義
pub mod common;

/// REST APIハンドラー
pub mod api;

/// 監査ログ（型・レコーダー・インターセプタ・エクスポート）
pub mod audit;

/// CLIインターフェース
pub mod cli;

/// 環境変数からの設定読み込み
pub mod config;

/// データベースアクセス
pub mod db;

/// ロギング（マスク処理・マルチシンク出力）
pub mod logging;

/// セカンダリメトリクス転送
pub mod monitoring;

/// 汎用バッチ書き込みキュー
pub mod queue;

/// サーバーの組み立てと停止
pub mod server;

use std::sync::Arc;

/// アプリケーション状態
#[derive(Clone)]
pub struct AppState {
    /// 監査ログストレージ（読み取り系）
    pub audit_log_storage: Arc<db::audit_log::AuditLogStorage>,
    /// 監査イベントレコーダー
    pub audit_recorder: audit::recorder::AuditRecorder,
    /// リクエストログの出力口
    pub request_logger: logging::RequestLogger,
    /// リクエストログの除外パス
    pub exclusions: Arc<audit::middleware::ExclusionRules>,
    /// 識別情報の解決（未設定なら全リクエストを匿名扱い）
    pub identity: Option<Arc<dyn db::identity::IdentityResolver>>,
    /// セカンダリメトリクス転送
    pub metrics: monitoring::MetricsForwarder,
}
