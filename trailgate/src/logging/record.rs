//! リクエストログレコードの型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ログレベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// 正常
    Info,
    /// クライアントエラー（4xx）
    Warn,
    /// サーバーエラー（5xx）
    Error,
}

impl LogLevel {
    /// HTTPステータスからログレベルを導出する
    pub fn from_status(status: u16) -> Self {
        match status {
            s if s >= 500 => Self::Error,
            s if s >= 400 => Self::Warn,
            _ => Self::Info,
        }
    }

    /// 文字列表現
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 例外経路で付与するエラー詳細
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// エラー種別名
    pub name: String,
    /// メッセージ
    pub message: String,
    /// スタック（取得できた場合）
    pub stack: Option<String>,
}

/// 1リクエスト（または1操作）分のログレコード
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// タイムスタンプ
    pub timestamp: DateTime<Utc>,
    /// ログレベル
    pub level: LogLevel,
    /// メッセージ
    pub message: String,
    /// アクターID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// HTTPメソッド
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// リクエストURI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// HTTPステータス
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// 処理時間（ミリ秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    /// リクエストボディ（status >= 400 の場合のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    /// レスポンスボディ（status >= 400 の場合のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<Value>,
    /// 任意の追加情報
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// エラー詳細
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl LogRecord {
    /// メッセージのみのレコードを作成
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            actor_id: None,
            method: None,
            uri: None,
            status: None,
            elapsed_ms: None,
            request_body: None,
            response_body: None,
            metadata: None,
            error: None,
        }
    }

    /// HTTPリクエスト完了レコードを作成
    ///
    /// レベルはステータスから導出する。
    pub fn for_request(method: &str, uri: &str, status: u16, elapsed_ms: u64) -> Self {
        let mut record = Self::new(
            LogLevel::from_status(status),
            format!("{method} {uri} {status} {elapsed_ms}ms"),
        );
        record.method = Some(method.to_string());
        record.uri = Some(uri.to_string());
        record.status = Some(status);
        record.elapsed_ms = Some(elapsed_ms);
        record
    }

    /// ボディを付与する（status >= 400 の場合のみ反映）
    pub fn with_bodies(mut self, request_body: Option<Value>, response_body: Option<Value>) -> Self {
        if self.status.is_some_and(|s| s >= 400) {
            self.request_body = request_body;
            self.response_body = response_body;
        }
        self
    }
}
