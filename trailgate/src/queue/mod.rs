//! 汎用バッチ書き込みキュー
//!
//! エントリをメモリ上のFIFOバッファに溜め、件数または時間で一括書き込みする。
//! 監査ログとセカンダリメトリクスがそれぞれ独立したインスタンスを持つ。
//!
//! 配信保証は at-most-once: 書き込みに失敗したバッチは再投入せず破棄する。

use crate::common::error::TrailResult;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// バッチの書き込み先
#[async_trait]
pub trait BatchSink<T>: Send + Sync + 'static {
    /// エントリ列を1回の一括書き込みで永続化する
    async fn write_batch(&self, batch: &[T]) -> TrailResult<()>;
}

/// キュー設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchQueueConfig {
    /// 1回のフラッシュで書き込む最大件数
    pub batch_size: usize,
    /// 定期フラッシュ間隔
    pub flush_interval: Duration,
    /// 連続フラッシュ間の待機時間
    pub drain_delay: Duration,
    /// バッファ上限（超過時は最古のエントリを破棄）
    pub max_buffered: usize,
}

impl Default for BatchQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_secs(5),
            drain_delay: Duration::from_millis(10),
            max_buffered: 10_000,
        }
    }
}

impl From<crate::config::QueueSettings> for BatchQueueConfig {
    fn from(settings: crate::config::QueueSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            flush_interval: settings.flush_interval,
            ..Self::default()
        }
    }
}

/// フラッシュ1回の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// 別のフラッシュが実行中のため何もしなかった
    Skipped,
    /// バッファが空だった
    Empty,
    /// 書き込み成功（件数）
    Written(usize),
    /// 書き込み失敗（破棄した件数）
    Dropped(usize),
}

/// キューの累計カウンタ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// 受け付けた件数
    pub enqueued: u64,
    /// 書き込み成功した件数
    pub written: u64,
    /// 書き込み失敗で破棄した件数
    pub dropped_failed: u64,
    /// バッファ溢れで破棄した件数
    pub dropped_overflow: u64,
    /// 停止後に受け付けを拒否した件数
    pub rejected_closed: u64,
    /// 書き込み成功したバッチ数
    pub batches: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    written: AtomicU64,
    dropped_failed: AtomicU64,
    dropped_overflow: AtomicU64,
    rejected_closed: AtomicU64,
    batches: AtomicU64,
}

struct Inner<T> {
    name: &'static str,
    config: BatchQueueConfig,
    buffer: Mutex<VecDeque<T>>,
    /// 単一実行ガード（同一キューへの書き込みは常に1つだけ）
    flush_lock: tokio::sync::Mutex<()>,
    sink: Arc<dyn BatchSink<T>>,
    runtime: Handle,
    closed: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

/// 汎用バッチ書き込みキュー
///
/// Clone可能（内部状態を共有）。`new` はtokioランタイム内で呼び出すこと。
pub struct BatchQueue<T: Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + Sync + 'static> Clone for BatchQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> BatchQueue<T> {
    /// 新しいキューを作成し、定期フラッシュタイマーを起動する
    pub fn new(name: &'static str, sink: Arc<dyn BatchSink<T>>, config: BatchQueueConfig) -> Self {
        let config = BatchQueueConfig {
            batch_size: config.batch_size.max(1),
            max_buffered: config.max_buffered.max(config.batch_size.max(1)),
            ..config
        };
        let inner = Arc::new(Inner {
            name,
            config,
            buffer: Mutex::new(VecDeque::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            sink,
            runtime: Handle::current(),
            closed: AtomicBool::new(false),
            timer: Mutex::new(None),
            counters: Counters::default(),
        });

        let timer = inner
            .runtime
            .spawn(Self::timer_task(Arc::downgrade(&inner), config.flush_interval));
        if let Ok(mut slot) = inner.timer.lock() {
            *slot = Some(timer);
        }

        Self { inner }
    }

    /// 定期フラッシュタスク
    ///
    /// キュー本体が破棄されたら終了する。
    async fn timer_task(inner: Weak<Inner<T>>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 最初のtickはすぐに発火するのでスキップ
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            Self { inner }.flush().await;
        }
    }

    /// キュー名
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// 設定
    pub fn config(&self) -> BatchQueueConfig {
        self.inner.config
    }

    /// 未フラッシュ件数
    pub fn pending(&self) -> usize {
        self.inner.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// 累計カウンタ
    pub fn stats(&self) -> QueueStats {
        let c = &self.inner.counters;
        QueueStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            written: c.written.load(Ordering::Relaxed),
            dropped_failed: c.dropped_failed.load(Ordering::Relaxed),
            dropped_overflow: c.dropped_overflow.load(Ordering::Relaxed),
            rejected_closed: c.rejected_closed.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
        }
    }

    /// エントリをバッファに追加する（ブロックしない）
    ///
    /// バッファがバッチサイズに達したらバックグラウンドでフラッシュを要求する。
    pub fn enqueue(&self, entry: T) {
        let len = {
            let Ok(mut buffer) = self.inner.buffer.lock() else {
                warn!(queue = self.inner.name, "Queue buffer poisoned, discarding entry");
                return;
            };
            // closedの判定はバッファロック下で行う
            if self.inner.closed.load(Ordering::Acquire) {
                drop(buffer);
                self.inner
                    .counters
                    .rejected_closed
                    .fetch_add(1, Ordering::Relaxed);
                warn!(queue = self.inner.name, "Queue is shut down, discarding entry");
                return;
            }
            if buffer.len() >= self.inner.config.max_buffered {
                buffer.pop_front();
                self.inner
                    .counters
                    .dropped_overflow
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue = self.inner.name,
                    capacity = self.inner.config.max_buffered,
                    "Queue buffer overflow, discarding oldest entry"
                );
            }
            buffer.push_back(entry);
            buffer.len()
        };
        self.inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        if len >= self.inner.config.batch_size {
            self.spawn_flush(Duration::ZERO);
        }
    }

    fn spawn_flush(&self, delay: Duration) {
        let queue = self.clone();
        self.inner.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.flush().await;
        });
    }

    fn take_batch(&self) -> Vec<T> {
        let Ok(mut buffer) = self.inner.buffer.lock() else {
            return Vec::new();
        };
        let n = buffer.len().min(self.inner.config.batch_size);
        buffer.drain(..n).collect()
    }

    /// 先頭から最大 `batch_size` 件を一括書き込みする
    ///
    /// 既に別のフラッシュが実行中なら何もせず `Skipped` を返す。
    /// 成功後にバッファが残っていれば、短い待機の後に次のフラッシュを予約する。
    pub async fn flush(&self) -> FlushOutcome {
        let Ok(_guard) = self.inner.flush_lock.try_lock() else {
            return FlushOutcome::Skipped;
        };

        let outcome = self.write_next_batch().await;

        if matches!(outcome, FlushOutcome::Written(_)) && self.pending() > 0 {
            self.spawn_flush(self.inner.config.drain_delay);
        }
        outcome
    }

    /// フラッシュロック保持中に呼ぶこと
    async fn write_next_batch(&self) -> FlushOutcome {
        let batch = self.take_batch();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        let count = batch.len();

        match self.inner.sink.write_batch(&batch).await {
            Ok(()) => {
                let c = &self.inner.counters;
                c.written.fetch_add(count as u64, Ordering::Relaxed);
                c.batches.fetch_add(1, Ordering::Relaxed);
                debug!(queue = self.inner.name, count, "Flushed batch");
                FlushOutcome::Written(count)
            }
            Err(e) => {
                self.inner
                    .counters
                    .dropped_failed
                    .fetch_add(count as u64, Ordering::Relaxed);
                warn!(
                    queue = self.inner.name,
                    "Failed to flush batch: {}. {} entries lost.", e, count
                );
                FlushOutcome::Dropped(count)
            }
        }
    }

    /// タイマーを停止し、バッファが空になるか書き込みに失敗するまでフラッシュする
    ///
    /// 実行中のフラッシュがあれば完了を待つ。以降の `enqueue` は破棄される。
    pub async fn shutdown(&self) {
        let buffer = self.inner.buffer.lock();
        self.inner.closed.store(true, Ordering::Release);
        drop(buffer);
        if let Ok(mut slot) = self.inner.timer.lock() {
            if let Some(timer) = slot.take() {
                timer.abort();
            }
        }

        let _guard = self.inner.flush_lock.lock().await;
        let remaining = self.pending();
        if remaining > 0 {
            info!(
                queue = self.inner.name,
                remaining, "Queue shutting down, flushing remaining entries"
            );
        }
        loop {
            match self.write_next_batch().await {
                FlushOutcome::Written(_) => continue,
                FlushOutcome::Dropped(_) => {
                    let left = self.pending();
                    if left > 0 {
                        warn!(
                            queue = self.inner.name,
                            left, "Backend unavailable at shutdown, abandoning remaining entries"
                        );
                    }
                    break;
                }
                FlushOutcome::Empty | FlushOutcome::Skipped => break,
            }
        }
        info!(queue = self.inner.name, "Queue stopped");
    }
}
