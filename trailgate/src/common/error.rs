//! trailgate全体で使うエラー型
//!
//! 監査ストア・識別情報・設定・入力検証の失敗を1つの列挙型にまとめる。
//! HTTP境界では `status_code` と `external_message` で応答に変換する。

use axum::http::StatusCode;
use thiserror::Error;

/// trailgate error type
#[derive(Debug, Error)]
pub enum TrailError {
    /// 監査ストア・識別情報ストアの読み書き失敗
    #[error("Database error: {0}")]
    Database(String),

    /// 起動時設定の不備（不正なURL、除外パターン等）
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// クエリパラメータ等の入力不正
    #[error("Validation error: {0}")]
    Validation(String),

    /// JSONの変換失敗
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 対象が存在しない（APIキー等）
    #[error("Not found: {0}")]
    NotFound(String),

    /// 識別情報が無い、または無効
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// 上記以外の内部エラー（CSV出力失敗等）
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrailError {
    /// クライアントに返す文言
    ///
    /// 内部情報（SQL文やファイルパス等）を含まない固定文言を返す。
    /// 詳細は `Display` 実装でサーバーログにのみ出力する。
    pub fn external_message(&self) -> &'static str {
        match self {
            Self::Database(_) => "Database error",
            Self::Configuration(_) => "Server misconfigured",
            Self::Validation(_) => "Invalid request",
            Self::Serialization(_) => "Request error",
            Self::NotFound(_) => "Not found",
            Self::Authentication(_) => "Authentication required",
            Self::Internal(_) => "Internal server error",
        }
    }

    /// 対応するHTTPステータス
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Serialization(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for TrailError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias
pub type TrailResult<T> = Result<T, TrailError>;
