// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-key request batcher.
//!
//! Requests are queued per key (normally `service:operation`) and handed to
//! a [`Dispatch`] implementation in groups:
//!
//! ```text
//! submit(key, item, priority)
//!       │
//!       ▼
//! ┌──────────────────────────────────────┐
//! │ queue[key]  (priority-sorted, stable)│
//! └──────────────────────────────────────┘
//!       │  len >= max_batch_size
//!       │  OR oldest waited max_wait_time (time/hybrid at submit, any on timer)
//!       │  AND in_flight[key] < max_concurrent_batches
//!       ▼
//! dispatch(first max_batch_size entries) ──→ results mapped 1:1 in order
//!       │
//!       └─→ on completion: re-check the remaining queue
//! ```
//!
//! A key with waiting requests always has either a timer armed or a batch in
//! flight whose completion will re-check it, so no request is stranded.

use super::promise::{result_slot, ResultSlot};
use super::{BatchConfig, BatchError, BatchStrategy, FlushReason};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Executes one batch as a unit.
///
/// Must return exactly one result per item, in item order. An `Err` fails
/// every request in the group.
#[async_trait]
pub trait Dispatch<I, O, E>: Send + Sync {
    async fn dispatch(&self, key: &str, items: Vec<I>) -> Result<Vec<Result<O, E>>, E>;
}

struct PendingEntry<I, O, E> {
    request_id: u64,
    item: I,
    priority: i32,
    slot: ResultSlot<Result<O, E>>,
    enqueued_at: Instant,
}

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct KeyQueue<I, O, E> {
    pending: Vec<PendingEntry<I, O, E>>,
    in_flight: usize,
    timer: Option<ArmedTimer>,
}

impl<I, O, E> KeyQueue<I, O, E> {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            in_flight: 0,
            timer: None,
        }
    }

    /// Insert after every entry of equal or higher priority.
    fn enqueue(&mut self, entry: PendingEntry<I, O, E>, by_priority: bool) {
        let pos = if by_priority {
            self.pending
                .iter()
                .position(|e| e.priority < entry.priority)
                .unwrap_or(self.pending.len())
        } else {
            self.pending.len()
        };
        self.pending.insert(pos, entry);
    }

    fn oldest(&self) -> Option<Instant> {
        self.pending.iter().map(|e| e.enqueued_at).min()
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

type ReadyBatch<I, O, E> = (Vec<PendingEntry<I, O, E>>, FlushReason);

/// Queue state for one key
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub timer_armed: bool,
}

/// Batcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    pub queues: BTreeMap<String, QueueStats>,
    pub total_pending: usize,
    pub total_in_flight: usize,
    pub batches_dispatched: u64,
    pub requests_dispatched: u64,
    pub size_flushes: u64,
    pub time_flushes: u64,
    pub manual_flushes: u64,
}

pub struct Batcher<I, O, E> {
    config: BatchConfig,
    dispatcher: Arc<dyn Dispatch<I, O, E>>,
    queues: Mutex<HashMap<String, KeyQueue<I, O, E>>>,
    next_request_id: AtomicU64,
    next_timer_generation: AtomicU64,

    // Metrics
    batches_dispatched: AtomicU64,
    requests_dispatched: AtomicU64,
    size_flushes: AtomicU64,
    time_flushes: AtomicU64,
    manual_flushes: AtomicU64,
}

/// Releases a batch's in-flight slot when the dispatch task ends, even if
/// the dispatcher panicked.
struct Completion<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Clone + From<BatchError> + Send + 'static,
{
    batcher: Arc<Batcher<I, O, E>>,
    key: String,
}

impl<I, O, E> Drop for Completion<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Clone + From<BatchError> + Send + 'static,
{
    fn drop(&mut self) {
        self.batcher.complete(&self.key);
    }
}

impl<I, O, E> Batcher<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Clone + From<BatchError> + Send + 'static,
{
    pub fn new(config: BatchConfig, dispatcher: Arc<dyn Dispatch<I, O, E>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            dispatcher,
            queues: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            next_timer_generation: AtomicU64::new(1),
            batches_dispatched: AtomicU64::new(0),
            requests_dispatched: AtomicU64::new(0),
            size_flushes: AtomicU64::new(0),
            time_flushes: AtomicU64::new(0),
            manual_flushes: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Queue `item` under `key` and wait for its result.
    pub async fn submit(self: &Arc<Self>, key: &str, item: I, priority: i32) -> Result<O, E> {
        let (slot, pending) = result_slot();
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);

        let ready = {
            let mut queues = self.queues.lock();
            let queue = queues.entry(key.to_string()).or_insert_with(KeyQueue::new);
            queue.enqueue(
                PendingEntry {
                    request_id,
                    item,
                    priority,
                    slot,
                    enqueued_at: Instant::now(),
                },
                self.config.priority_enabled,
            );
            let ready = self.take_ready(queue, true);
            self.rearm(key, queue, !ready.is_empty());
            self.publish_depth(&queues);
            ready
        };
        debug!(key, request_id, priority, "Request queued for batching");

        self.launch(key, ready);
        pending
            .wait()
            .await
            .unwrap_or_else(|| Err(E::from(BatchError::Abandoned)))
    }

    /// Dispatch everything queued right now, ignoring windows and the
    /// concurrency cap, and wait for those dispatches to finish. Returns the
    /// number of requests flushed.
    pub async fn flush_all(self: &Arc<Self>) -> usize {
        let mut flushed = 0;
        let handles = {
            let mut queues = self.queues.lock();
            let mut batches = Vec::new();
            for (key, queue) in queues.iter_mut() {
                queue.cancel_timer();
                while !queue.pending.is_empty() {
                    let take = queue.pending.len().min(self.config.max_batch_size.max(1));
                    let entries: Vec<_> = queue.pending.drain(..take).collect();
                    queue.in_flight += 1;
                    flushed += entries.len();
                    batches.push((key.clone(), entries));
                }
            }
            self.publish_depth(&queues);

            let mut handles = Vec::with_capacity(batches.len());
            for (key, entries) in batches {
                handles.extend(self.launch(&key, vec![(entries, FlushReason::Manual)]));
            }
            handles
        };

        for outcome in futures::future::join_all(handles).await {
            if let Err(e) = outcome {
                error!(error = %e, "Flushed batch task failed");
            }
        }
        if flushed > 0 {
            info!(flushed, "Flushed all batch queues");
        }
        flushed
    }

    /// Requests waiting across all keys
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queues.lock().values().map(|q| q.pending.len()).sum()
    }

    /// Batches currently executing across all keys
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.queues.lock().values().map(|q| q.in_flight).sum()
    }

    #[must_use]
    pub fn stats(&self) -> BatchStats {
        let queues = self.queues.lock();
        let per_key: BTreeMap<String, QueueStats> = queues
            .iter()
            .map(|(key, q)| {
                (
                    key.clone(),
                    QueueStats {
                        pending: q.pending.len(),
                        in_flight: q.in_flight,
                        timer_armed: q.timer.is_some(),
                    },
                )
            })
            .collect();

        BatchStats {
            total_pending: per_key.values().map(|q| q.pending).sum(),
            total_in_flight: per_key.values().map(|q| q.in_flight).sum(),
            queues: per_key,
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            requests_dispatched: self.requests_dispatched.load(Ordering::Relaxed),
            size_flushes: self.size_flushes.load(Ordering::Relaxed),
            time_flushes: self.time_flushes.load(Ordering::Relaxed),
            manual_flushes: self.manual_flushes.load(Ordering::Relaxed),
        }
    }

    /// Remove every batch that may go now. `at_submit` limits the age
    /// trigger to time/hybrid strategies; timers and completions apply it
    /// to all strategies.
    fn take_ready(&self, queue: &mut KeyQueue<I, O, E>, at_submit: bool) -> Vec<ReadyBatch<I, O, E>> {
        let mut ready = Vec::new();
        let now = Instant::now();
        let max_batch = self.config.max_batch_size.max(1);
        let age_counts = !at_submit || self.config.strategy != BatchStrategy::Size;

        while !queue.pending.is_empty() && queue.in_flight < self.config.max_concurrent_batches {
            let full = queue.pending.len() >= max_batch;
            let aged = queue
                .oldest()
                .is_some_and(|t| now.saturating_duration_since(t) >= self.config.max_wait_time);

            let reason = if full {
                FlushReason::Size
            } else if aged && age_counts {
                FlushReason::Time
            } else {
                break;
            };

            let take = queue.pending.len().min(max_batch);
            let entries: Vec<_> = queue.pending.drain(..take).collect();
            queue.in_flight += 1;
            ready.push((entries, reason));
        }
        ready
    }

    /// Keep the key's timer consistent with its queue: cancelled after an
    /// early dispatch or when empty, armed for the oldest request otherwise.
    /// At the concurrency cap the next completion re-checks instead.
    fn rearm(self: &Arc<Self>, key: &str, queue: &mut KeyQueue<I, O, E>, dispatched: bool) {
        if dispatched || queue.pending.is_empty() {
            queue.cancel_timer();
        }
        if queue.timer.is_some() || queue.in_flight >= self.config.max_concurrent_batches {
            return;
        }
        let Some(oldest) = queue.oldest() else {
            return;
        };

        let deadline = oldest + self.config.max_wait_time;
        let generation = self.next_timer_generation.fetch_add(1, Ordering::Relaxed);
        let batcher = Arc::clone(self);
        let timer_key = key.to_string();
        if let Some(handle) = spawn(async move {
            tokio::time::sleep_until(deadline).await;
            batcher.on_timer(&timer_key, generation);
        }) {
            queue.timer = Some(ArmedTimer { generation, handle });
        }
    }

    fn on_timer(self: &Arc<Self>, key: &str, generation: u64) {
        let ready = {
            let mut queues = self.queues.lock();
            let Some(queue) = queues.get_mut(key) else {
                return;
            };
            if queue.timer.as_ref().map(|t| t.generation) != Some(generation) {
                return;
            }
            queue.timer = None;
            let ready = self.take_ready(queue, false);
            self.rearm(key, queue, !ready.is_empty());
            self.publish_depth(&queues);
            ready
        };
        self.launch(key, ready);
    }

    fn complete(self: &Arc<Self>, key: &str) {
        let ready = {
            let mut queues = self.queues.lock();
            let Some(queue) = queues.get_mut(key) else {
                return;
            };
            queue.in_flight = queue.in_flight.saturating_sub(1);
            let ready = self.take_ready(queue, false);
            self.rearm(key, queue, !ready.is_empty());
            self.publish_depth(&queues);
            ready
        };
        self.launch(key, ready);
    }

    fn launch(self: &Arc<Self>, key: &str, ready: Vec<ReadyBatch<I, O, E>>) -> Vec<JoinHandle<()>> {
        ready
            .into_iter()
            .filter_map(|(entries, reason)| {
                let batcher = Arc::clone(self);
                let key = key.to_string();
                spawn(async move { batcher.run_batch(key, entries, reason).await })
            })
            .collect()
    }

    async fn run_batch(self: Arc<Self>, key: String, entries: Vec<PendingEntry<I, O, E>>, reason: FlushReason) {
        let _completion = Completion {
            batcher: Arc::clone(&self),
            key: key.clone(),
        };

        let count = entries.len();
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.requests_dispatched.fetch_add(count as u64, Ordering::Relaxed);
        let by_reason = match reason {
            FlushReason::Size => &self.size_flushes,
            FlushReason::Time => &self.time_flushes,
            FlushReason::Manual => &self.manual_flushes,
        };
        by_reason.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_batch_size(&key, count);
        crate::metrics::record_batch_flush(reason.as_str());

        let request_ids: Vec<u64> = entries.iter().map(|e| e.request_id).collect();
        debug!(key = %key, count, reason = reason.as_str(), ?request_ids, "Dispatching batch");

        let mut items = Vec::with_capacity(count);
        let mut slots = Vec::with_capacity(count);
        for entry in entries {
            items.push(entry.item);
            slots.push(entry.slot);
        }

        let started = Instant::now();
        let outcome = self.dispatcher.dispatch(&key, items).await;
        crate::metrics::record_dispatch_duration(started.elapsed());

        match outcome {
            Ok(results) if results.len() == count => {
                for (slot, result) in slots.into_iter().zip(results) {
                    slot.fulfill(result);
                }
            }
            Ok(results) => {
                error!(key = %key, expected = count, got = results.len(), "Batch result count mismatch");
                let err = E::from(BatchError::ResultCountMismatch {
                    expected: count,
                    got: results.len(),
                });
                for slot in slots {
                    slot.fulfill(Err(err.clone()));
                }
            }
            Err(err) => {
                warn!(key = %key, count, "Batch dispatch failed, failing every request in the group");
                for slot in slots {
                    slot.fulfill(Err(err.clone()));
                }
            }
        }
    }

    fn publish_depth(&self, queues: &HashMap<String, KeyQueue<I, O, E>>) {
        crate::metrics::set_batch_queue_items(queues.values().map(|q| q.pending.len()).sum());
    }
}

/// Spawn on the current runtime, if there still is one.
fn spawn<F>(future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => Some(runtime.spawn(future)),
        Err(_) => {
            warn!("No tokio runtime available, batch work dropped");
            None
        }
    }
}
