//! リクエストコンテキスト
//!
//! ヘッダーから監査エントリのリクエスト由来情報（IP、User-Agent、セッション）と
//! 解決済みの識別情報を導出する。

use crate::common::ip::client_ip_from_headers;
use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};

/// セッションCookie名
pub const SESSION_COOKIE: &str = "trailgate_session";

/// APIキーヘッダー名
pub const API_KEY_HEADER: &str = "x-api-key";

/// 無効なAPIキーを提示したリクエストのアクター表記
pub const INVALID_API_KEY_ACTOR: &str = "api_key:invalid";

/// インターセプタが解決した識別情報
///
/// ハンドラーが取り出せるようにリクエストのextensionsに格納される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedActor {
    /// 有効なAPIキー
    ApiKey {
        /// APIキーID
        key_id: String,
        /// 発行者のユーザーID
        owner_id: Option<String>,
    },
    /// 有効なセッション
    Session {
        /// ユーザーID
        user_id: String,
        /// セッションID
        session_id: String,
    },
    /// APIキーが提示されたが無効だった
    InvalidApiKey,
    /// 認証情報なし
    Anonymous,
}

impl ResolvedActor {
    /// ユーザーID
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::ApiKey { owner_id, .. } => owner_id.as_deref(),
            Self::Session { user_id, .. } => Some(user_id),
            Self::InvalidApiKey | Self::Anonymous => None,
        }
    }

    /// APIキーID
    pub fn api_key_id(&self) -> Option<&str> {
        match self {
            Self::ApiKey { key_id, .. } => Some(key_id),
            _ => None,
        }
    }

    /// ログレコードに出すアクター表記
    pub fn log_label(&self) -> Option<String> {
        match self {
            Self::ApiKey { key_id, owner_id } => Some(
                owner_id
                    .clone()
                    .unwrap_or_else(|| format!("api_key:{}", key_id)),
            ),
            Self::Session { user_id, .. } => Some(user_id.clone()),
            Self::InvalidApiKey => Some(INVALID_API_KEY_ACTOR.to_string()),
            Self::Anonymous => None,
        }
    }
}

/// 監査エントリに付与するリクエスト由来情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// クライアントIP（特定できなければ "unknown"）
    pub ip_address: Option<String>,
    /// User-Agent
    pub user_agent: Option<String>,
    /// セッションID（解決済みセッションのみ。Cookieのトークンそのものは保持しない）
    pub session_id: Option<String>,
    /// 解決済みユーザーID
    pub actor_id: Option<String>,
    /// 解決済みAPIキーID
    pub api_key_id: Option<String>,
}

impl RequestContext {
    /// ヘッダーから作成する（識別情報は含まない）
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: Some(client_ip_from_headers(headers)),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            session_id: None,
            actor_id: None,
            api_key_id: None,
        }
    }

    /// 解決済みの識別情報を付与する
    pub fn with_actor(mut self, actor: &ResolvedActor) -> Self {
        self.actor_id = actor.user_id().map(str::to_string);
        self.api_key_id = actor.api_key_id().map(str::to_string);
        if let ResolvedActor::Session { session_id, .. } = actor {
            self.session_id = Some(session_id.clone());
        }
        self
    }
}

/// Cookieヘッダーからセッショントークンを取り出す
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// APIキーヘッダーの値
pub fn api_key_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
