//! 機密フィールドのマスク処理
//!
//! ログ出力前にJSON値を再帰的に走査し、機密キーの値を固定マーカーに置換する。

use serde_json::{Map, Value};

/// マスク後の値
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// デフォルトのマスク対象キー断片（小文字、部分一致）
pub const DEFAULT_SENSITIVE_FRAGMENTS: &[&str] = &[
    "password",
    "token",
    "secret",
    "apikey",
    "api_key",
    "accesstoken",
    "refreshtoken",
    "authorization",
    "cookie",
];

/// 機密キーのマスク処理
#[derive(Debug, Clone)]
pub struct Redactor {
    fragments: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_FRAGMENTS.iter().copied())
    }
}

impl Redactor {
    /// キー断片のリストからRedactorを作成（大文字小文字は区別しない）
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fragments = fragments
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { fragments }
    }

    /// キー名が機密扱いか判定する
    pub fn is_sensitive(&self, key: &str) -> bool {
        let key_lower = key.to_lowercase();
        self.fragments.iter().any(|f| key_lower.contains(f.as_str()))
    }

    /// 値をマスクしたコピーを返す
    ///
    /// ネストしたオブジェクトと、配列内のオブジェクトも再帰的に処理する。
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut redacted = Map::with_capacity(map.len());
                for (key, val) in map {
                    if self.is_sensitive(key) {
                        redacted.insert(key.clone(), Value::String(REDACTION_MARKER.to_string()));
                    } else {
                        redacted.insert(key.clone(), self.redact(val));
                    }
                }
                Value::Object(redacted)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            _ => value.clone(),
        }
    }
}
