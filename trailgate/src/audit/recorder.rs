//! 監査イベントレコーダー
//!
//! ビジネス操作の結果を監査エントリとしてバッチキューに積む。
//! 呼び出し側は書き込み完了を待たない。

use crate::audit::context::RequestContext;
use crate::audit::types::{AuditAction, AuditDescriptor, AuditEntry};
use crate::logging::redact::Redactor;
use crate::queue::BatchQueue;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// 監査イベントレコーダー
///
/// Clone可能（キューを共有）。メタデータは積む前にマスクする。
#[derive(Clone)]
pub struct AuditRecorder {
    queue: BatchQueue<AuditEntry>,
    redactor: Arc<Redactor>,
}

impl AuditRecorder {
    /// 新しいレコーダーを作成
    pub fn new(queue: BatchQueue<AuditEntry>, redactor: Redactor) -> Self {
        Self {
            queue,
            redactor: Arc::new(redactor),
        }
    }

    /// 書き込み先キュー
    pub fn queue(&self) -> &BatchQueue<AuditEntry> {
        &self.queue
    }

    /// 時点の事実を記録する（fire-and-forget）
    pub fn record(&self, descriptor: AuditDescriptor, context: Option<&RequestContext>) {
        let entry = build_entry(descriptor, context);
        self.enqueue(entry);
    }

    /// 操作を実行し、その結果を記録する
    ///
    /// 成功時は処理時間付きで本来のアクションを記録し、結果をそのまま返す。
    /// 失敗時はアクションを `system_error` に置き換え、本来のアクションと
    /// エラーメッセージをメタデータに入れて記録した上で、元のエラーを返す。
    pub async fn wrap<T, E, Fut>(
        &self,
        descriptor: AuditDescriptor,
        context: Option<&RequestContext>,
        operation: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let start = Instant::now();
        let result = operation.await;
        let duration_ms = start.elapsed().as_millis() as i64;

        let mut entry = build_entry(descriptor, context);
        entry.duration_ms = Some(duration_ms);

        if let Err(e) = &result {
            let intended = entry.action;
            entry.action = AuditAction::SystemError;
            entry.insert_metadata("intended_action", json!(intended.as_str()));
            entry.insert_metadata("error", json!(e.to_string()));
        }

        self.enqueue(entry);
        result
    }

    fn enqueue(&self, mut entry: AuditEntry) {
        entry.metadata = self.redactor.redact(&entry.metadata);
        debug!(
            action = entry.action.as_str(),
            entity_kind = entry.entity_kind.as_str(),
            "audit entry captured"
        );
        self.queue.enqueue(entry);
    }
}

fn build_entry(descriptor: AuditDescriptor, context: Option<&RequestContext>) -> AuditEntry {
    let mut entry = AuditEntry::new(descriptor.action, descriptor.entity_kind);
    entry.entity_id = descriptor.entity_id;
    entry.metadata = match descriptor.metadata {
        Some(Value::Object(map)) => Value::Object(map),
        Some(other) => json!({ "value": other }),
        None => Value::Object(Map::new()),
    };

    entry.actor_id = descriptor
        .actor_id
        .or_else(|| context.and_then(|c| c.actor_id.clone()));
    entry.api_key_id = descriptor
        .api_key_id
        .or_else(|| context.and_then(|c| c.api_key_id.clone()));

    if let Some(ctx) = context {
        entry.ip_address = ctx.ip_address.clone();
        entry.user_agent = ctx.user_agent.clone();
        entry.session_id = ctx.session_id.clone();
    }
    entry
}
