//! Integration Test: バッチキューと監査レコーダー
//!
//! 件数・時間によるフラッシュ、失敗時の破棄、単一実行、停止時の排出を確認する。
//! 任意の件数・バッチサイズでの順序保持と1回限りの書き込みはproptestで確認する。

use proptest::prelude::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use trailgate::audit::recorder::AuditRecorder;
use trailgate::audit::types::{AuditAction, AuditDescriptor, AuditEntry, AuditFilter, EntityKind};
use trailgate::db::audit_log::AuditLogStorage;
use trailgate::logging::redact::Redactor;
use trailgate::queue::{BatchQueue, BatchQueueConfig, FlushOutcome};

use crate::support::{self, RecordingSink};

fn config(batch_size: usize, flush_interval: Duration) -> BatchQueueConfig {
    BatchQueueConfig {
        batch_size,
        flush_interval,
        ..BatchQueueConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_partial_batch_flushed_by_timer() {
    let sink = Arc::new(RecordingSink::<u32>::new());
    let queue: BatchQueue<u32> =
        BatchQueue::new("test", sink.clone(), config(10, Duration::from_secs(5)));

    for i in 0..3 {
        queue.enqueue(i);
    }
    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert!(sink.batch_sizes().is_empty(), "no flush before the interval");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.batch_sizes(), vec![3]);
    assert_eq!(queue.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_full_batches_flush_without_waiting_for_timer() {
    let sink = Arc::new(RecordingSink::<u32>::new());
    let queue: BatchQueue<u32> =
        BatchQueue::new("test", sink.clone(), config(10, Duration::from_secs(5)));

    for i in 0..25 {
        queue.enqueue(i);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(sink.batch_sizes(), vec![10, 10, 5]);
    let flushed: Vec<u32> = sink.batches.lock().unwrap().concat();
    assert_eq!(flushed, (0..25).collect::<Vec<_>>(), "FIFO order is preserved");
    assert_eq!(queue.stats().batches, 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_is_not_retried() {
    let sink = Arc::new(RecordingSink::<u32>::with_failures(1));
    let queue: BatchQueue<u32> =
        BatchQueue::new("test", sink.clone(), config(10, Duration::from_secs(5)));

    for i in 0..10 {
        queue.enqueue(i);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    assert_eq!(queue.pending(), 0, "failed batch is dropped, not re-queued");

    for i in 100..103 {
        queue.enqueue(i);
    }
    tokio::time::sleep(Duration::from_millis(5100)).await;

    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
    assert_eq!(sink.batches.lock().unwrap().concat(), vec![100, 101, 102]);
    let stats = queue.stats();
    assert_eq!(stats.dropped_failed, 10);
    assert_eq!(stats.written, 3);
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_flush_in_flight() {
    let sink = Arc::new(RecordingSink::<u32>::slow(Duration::from_millis(200)));
    let queue: BatchQueue<u32> =
        BatchQueue::new("test", sink.clone(), config(10, Duration::from_secs(1)));

    for i in 0..50 {
        queue.enqueue(i);
    }
    let mut handles = Vec::new();
    for _ in 0..5 {
        let q = queue.clone();
        handles.push(tokio::spawn(async move { q.flush().await }));
    }
    let outcomes: Vec<FlushOutcome> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert!(outcomes.contains(&FlushOutcome::Skipped));

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(sink.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(sink.total(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_everything_then_discards() {
    let sink = Arc::new(RecordingSink::<u32>::new());
    let queue: BatchQueue<u32> =
        BatchQueue::new("test", sink.clone(), config(10, Duration::from_secs(3600)));

    for i in 0..37 {
        queue.enqueue(i);
    }
    queue.shutdown().await;

    assert_eq!(sink.total(), 37);
    assert_eq!(queue.pending(), 0);

    queue.enqueue(999);
    assert_eq!(queue.pending(), 0, "entries after shutdown are discarded");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_at_first_failure() {
    let sink = Arc::new(RecordingSink::<u32>::with_failures(1));
    let queue: BatchQueue<u32> =
        BatchQueue::new("test", sink.clone(), config(10, Duration::from_secs(3600)));

    for i in 0..5 {
        queue.enqueue(i);
    }
    queue.shutdown().await;

    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    assert_eq!(queue.stats().dropped_failed, 5);
}

#[tokio::test]
async fn test_wrap_records_system_error_and_returns_original_error() {
    let pool = support::create_test_db_pool().await;
    let storage = Arc::new(AuditLogStorage::new(pool));
    let queue: BatchQueue<AuditEntry> =
        BatchQueue::new("audit", storage.clone(), config(10, Duration::from_secs(3600)));
    let recorder = AuditRecorder::new(queue, Redactor::default());

    let result: Result<(), String> = recorder
        .wrap(
            AuditDescriptor::new(AuditAction::ResourceUpdate, EntityKind::Resource)
                .entity_id("r-1")
                .actor("u-1"),
            None,
            async { Err("boom".to_string()) },
        )
        .await;
    assert_eq!(result, Err("boom".to_string()));

    let ok: Result<u32, String> = recorder
        .wrap(
            AuditDescriptor::new(AuditAction::ResourceCreate, EntityKind::Resource)
                .metadata(serde_json::json!({"password": "hunter2"})),
            None,
            async { Ok(7) },
        )
        .await;
    assert_eq!(ok, Ok(7));

    recorder.queue().shutdown().await;

    let page = storage.query(&AuditFilter::default(), 1, 10).await.unwrap();
    assert_eq!(page.total, 2);

    let failed = page
        .entries
        .iter()
        .find(|e| e.action == AuditAction::SystemError)
        .unwrap();
    assert_eq!(failed.metadata["intended_action"], "resource_update");
    assert_eq!(failed.metadata["error"], "boom");
    assert_eq!(failed.entity_id.as_deref(), Some("r-1"));
    assert_eq!(failed.actor_id.as_deref(), Some("u-1"));
    assert!(failed.duration_ms.is_some());

    let created = page
        .entries
        .iter()
        .find(|e| e.action == AuditAction::ResourceCreate)
        .unwrap();
    assert_eq!(created.metadata["password"], "[REDACTED]");
}

/// 件数とバッチサイズを与えてキューを流し切り、(書き込まれた順の値, バッチサイズ列, 書き込み件数) を返す
fn run_pipeline(n: u32, batch_size: usize, yield_every: u32) -> (Vec<u32>, Vec<usize>, u64) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();
    runtime.block_on(async move {
        let sink = Arc::new(RecordingSink::<u32>::new());
        let queue: BatchQueue<u32> =
            BatchQueue::new("prop", sink.clone(), config(batch_size, Duration::from_secs(5)));

        for i in 0..n {
            queue.enqueue(i);
            if i % yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.shutdown().await;

        let flushed = sink.batches.lock().unwrap().concat();
        (flushed, sink.batch_sizes(), queue.stats().written)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_every_entry_written_once_in_order(
        n in 0u32..300,
        batch_size in 1usize..40,
        yield_every in 1u32..20,
    ) {
        let (flushed, sizes, written) = run_pipeline(n, batch_size, yield_every);

        prop_assert_eq!(flushed, (0..n).collect::<Vec<_>>());
        prop_assert_eq!(written, n as u64);
        prop_assert!(sizes.iter().all(|&size| size >= 1 && size <= batch_size));
    }
}
