//! 監査ログの型定義
//!
//! アクション・エンティティの分類は閉じた列挙型で、
//! 新しいアクションの追加はこのファイルの `audit_actions!` への1行追加で完結する。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! audit_actions {
    ($($(#[$doc:meta])* $variant:ident => $name:literal,)+) => {
        /// 監査アクション
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum AuditAction {
            $($(#[$doc])* $variant,)+
        }

        impl AuditAction {
            /// 全アクション
            pub const ALL: &'static [AuditAction] = &[$(AuditAction::$variant,)+];

            /// 文字列に変換
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// 文字列から変換（未知の値は `None`）
            #[allow(clippy::should_implement_trait)]
            pub fn from_str(s: &str) -> Option<Self> {
                match s {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

audit_actions! {
    /// ログイン成功
    AuthLogin => "auth_login",
    /// ログアウト
    AuthLogout => "auth_logout",
    /// ログイン失敗
    AuthLoginFailed => "auth_login_failed",
    /// プロフィール更新
    ProfileUpdate => "profile_update",
    /// パスワード変更
    PasswordChange => "password_change",
    ResourceGroupCreate => "resource_group_create",
    ResourceGroupUpdate => "resource_group_update",
    ResourceGroupDelete => "resource_group_delete",
    ResourceCreate => "resource_create",
    ResourceUpdate => "resource_update",
    ResourceDelete => "resource_delete",
    CommentCreate => "comment_create",
    CommentUpdate => "comment_update",
    CommentDelete => "comment_delete",
    /// 通知送信
    NotificationSend => "notification_send",
    /// 通知既読
    NotificationRead => "notification_read",
    ApiKeyCreate => "api_key_create",
    ApiKeyRevoke => "api_key_revoke",
    AttachmentUpload => "attachment_upload",
    AttachmentDelete => "attachment_delete",
    /// データエクスポート
    DataExport => "data_export",
    /// 権限不足による拒否
    PermissionDenied => "permission_denied",
    /// 操作失敗（`wrap` が本来のアクションを置き換える）
    SystemError => "system_error",
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 操作対象のエンティティ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// ユーザー
    User,
    /// リソースグループ
    ResourceGroup,
    /// リソース
    Resource,
    /// コメント
    Comment,
    /// 通知
    Notification,
    /// APIキー
    ApiKey,
    /// 添付ファイル
    Attachment,
    /// システム
    System,
}

impl EntityKind {
    /// 文字列からEntityKindに変換（未知の値は `None`）
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "resource_group" => Some(Self::ResourceGroup),
            "resource" => Some(Self::Resource),
            "comment" => Some(Self::Comment),
            "notification" => Some(Self::Notification),
            "api_key" => Some(Self::ApiKey),
            "attachment" => Some(Self::Attachment),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    /// EntityKindを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::ResourceGroup => "resource_group",
            Self::Resource => "resource",
            Self::Comment => "comment",
            Self::Notification => "notification",
            Self::ApiKey => "api_key",
            Self::Attachment => "attachment",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 監査ログエントリ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// レコードID（DB挿入後に設定）
    pub id: Option<i64>,
    /// 実行ユーザーID
    pub actor_id: Option<String>,
    /// 使用されたAPIキーID
    pub api_key_id: Option<String>,
    /// アクション
    pub action: AuditAction,
    /// 対象エンティティ種別
    pub entity_kind: EntityKind,
    /// 対象エンティティID
    pub entity_id: Option<String>,
    /// 追加情報（JSONオブジェクト）
    pub metadata: Value,
    /// クライアントIPアドレス
    pub ip_address: Option<String>,
    /// User-Agent
    pub user_agent: Option<String>,
    /// セッションID
    pub session_id: Option<String>,
    /// 処理時間（ミリ秒）
    pub duration_ms: Option<i64>,
    /// 永続化時刻（DB挿入時に設定）
    pub created_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// アクションと対象種別のみのエントリを作成
    pub fn new(action: AuditAction, entity_kind: EntityKind) -> Self {
        Self {
            id: None,
            actor_id: None,
            api_key_id: None,
            action,
            entity_kind,
            entity_id: None,
            metadata: Value::Object(Map::new()),
            ip_address: None,
            user_agent: None,
            session_id: None,
            duration_ms: None,
            created_at: None,
        }
    }

    /// メタデータにキーを追加する（オブジェクト以外なら置き換える）
    pub fn insert_metadata(&mut self, key: &str, value: Value) {
        if !self.metadata.is_object() {
            self.metadata = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.metadata {
            map.insert(key.to_string(), value);
        }
    }
}

/// 記録する操作の記述
///
/// アクターを省略した場合はリクエストコンテキストの識別情報を使う。
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDescriptor {
    /// アクション
    pub action: AuditAction,
    /// 対象エンティティ種別
    pub entity_kind: EntityKind,
    /// 対象エンティティID
    pub entity_id: Option<String>,
    /// 実行ユーザーID
    pub actor_id: Option<String>,
    /// APIキーID
    pub api_key_id: Option<String>,
    /// 追加情報
    pub metadata: Option<Value>,
}

impl AuditDescriptor {
    /// アクションと対象種別を指定して作成
    pub fn new(action: AuditAction, entity_kind: EntityKind) -> Self {
        Self {
            action,
            entity_kind,
            entity_id: None,
            actor_id: None,
            api_key_id: None,
            metadata: None,
        }
    }

    /// 対象エンティティIDを設定
    pub fn entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// 実行ユーザーIDを明示する
    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// APIキーIDを明示する
    pub fn api_key(mut self, api_key_id: impl Into<String>) -> Self {
        self.api_key_id = Some(api_key_id.into());
        self
    }

    /// 追加情報を設定
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// 監査ログフィルタ
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    /// 実行ユーザーIDでフィルタ
    pub actor_id: Option<String>,
    /// エンティティ種別でフィルタ
    pub entity_kind: Option<EntityKind>,
    /// エンティティIDでフィルタ
    pub entity_id: Option<String>,
    /// アクションでフィルタ
    pub action: Option<AuditAction>,
    /// 開始日時
    pub time_from: Option<DateTime<Utc>>,
    /// 終了日時
    pub time_to: Option<DateTime<Utc>>,
}

/// ページング結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPage {
    /// エントリ（新しい順）
    pub entries: Vec<AuditEntry>,
    /// ページ番号（1始まり）
    pub page: i64,
    /// ページあたり件数
    pub limit: i64,
    /// 総件数
    pub total: i64,
    /// 総ページ数
    pub page_count: i64,
}

impl AuditPage {
    /// 総ページ数（ceil(total / limit)）
    pub fn page_count_for(total: i64, limit: i64) -> i64 {
        if limit <= 0 {
            return 0;
        }
        (total + limit - 1) / limit
    }
}
