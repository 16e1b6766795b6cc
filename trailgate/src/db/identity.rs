//! 識別情報の解決
//!
//! APIキーとセッションCookieから実行ユーザーを特定する。
//! シークレットは平文で保存せず、SHA-256ハッシュで照合する。

use crate::common::error::{TrailError, TrailResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

/// 有効なAPIキーの情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyIdentity {
    /// APIキーID
    pub key_id: String,
    /// 発行者のユーザーID
    pub owner_id: Option<String>,
}

/// 有効なセッションの情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// セッションID
    pub session_id: String,
    /// ユーザーID
    pub user_id: String,
}

/// 識別情報の解決
#[async_trait]
pub trait IdentityResolver: Send + Sync + 'static {
    /// APIキーを照合する（無効・失効・期限切れは `None`）
    async fn resolve_api_key(&self, key: &str) -> TrailResult<Option<ApiKeyIdentity>>;

    /// セッショントークンを照合する（無効・期限切れは `None`）
    async fn resolve_session(&self, token: &str) -> TrailResult<Option<SessionIdentity>>;
}

/// SHA-256ハッシュ化ヘルパー関数
pub fn hash_with_sha256(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// ランダムトークン生成
pub fn generate_random_token(length: usize) -> String {
    use rand::RngExt;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// 発行したAPIキー（平文は発行時にのみ返す）
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    /// APIキーID
    pub id: String,
    /// 平文のキー
    pub key: String,
}

/// SQLite実装
#[derive(Clone)]
pub struct SqliteIdentityResolver {
    pool: SqlitePool,
}

fn is_expired(expires_at: Option<&str>, now: DateTime<Utc>) -> bool {
    match expires_at {
        None => false,
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => ts.with_timezone(&Utc) <= now,
            // 解釈できない期限は期限切れとして扱う
            Err(_) => true,
        },
    }
}

impl SqliteIdentityResolver {
    /// 新しいリゾルバを作成
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// APIキーを発行する
    pub async fn issue_api_key(
        &self,
        name: &str,
        owner_id: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> TrailResult<IssuedApiKey> {
        let id = Uuid::new_v4().to_string();
        let key = format!("tg_{}", generate_random_token(32));

        sqlx::query(
            "INSERT INTO api_keys (id, key_hash, owner_id, name, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(hash_with_sha256(&key))
        .bind(owner_id)
        .bind(name)
        .bind(expires_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| TrailError::Database(format!("Failed to create API key: {}", e)))?;

        Ok(IssuedApiKey { id, key })
    }

    /// APIキーを失効させる
    pub async fn revoke_api_key(&self, id: &str) -> TrailResult<()> {
        let result = sqlx::query("UPDATE api_keys SET revoked_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| TrailError::Database(format!("Failed to revoke API key: {}", e)))?;
        if result.rows_affected() == 0 {
            return Err(TrailError::NotFound(format!("API key {}", id)));
        }
        Ok(())
    }

    /// セッションを作成し、Cookieに入れるトークンを返す
    pub async fn create_session(&self, user_id: &str, ttl: Duration) -> TrailResult<String> {
        let id = Uuid::new_v4().to_string();
        let token = generate_random_token(48);
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO sessions (id, token_hash, user_id, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(hash_with_sha256(&token))
        .bind(user_id)
        .bind((now + ttl).to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| TrailError::Database(format!("Failed to create session: {}", e)))?;

        Ok(token)
    }
}

#[async_trait]
impl IdentityResolver for SqliteIdentityResolver {
    async fn resolve_api_key(&self, key: &str) -> TrailResult<Option<ApiKeyIdentity>> {
        let row: Option<(String, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT id, owner_id, expires_at, revoked_at FROM api_keys WHERE key_hash = ?",
            )
            .bind(hash_with_sha256(key))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TrailError::Database(format!("Failed to look up API key: {}", e)))?;

        Ok(row.and_then(|(id, owner_id, expires_at, revoked_at)| {
            if revoked_at.is_some() || is_expired(expires_at.as_deref(), Utc::now()) {
                None
            } else {
                Some(ApiKeyIdentity {
                    key_id: id,
                    owner_id,
                })
            }
        }))
    }

    async fn resolve_session(&self, token: &str) -> TrailResult<Option<SessionIdentity>> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT id, user_id, expires_at FROM sessions WHERE token_hash = ?",
        )
        .bind(hash_with_sha256(token))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TrailError::Database(format!("Failed to look up session: {}", e)))?;

        Ok(row.and_then(|(id, user_id, expires_at)| {
            if is_expired(Some(&expires_at), Utc::now()) {
                None
            } else {
                Some(SessionIdentity {
                    session_id: id,
                    user_id,
                })
            }
        }))
    }
}
