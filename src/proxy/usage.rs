//! Usage accounting split (step 12): synchronous increments happen inline
//! in the token validator for limited tokens. This module is the async
//! aggregator side for unlimited tokens and for cache-hit counters, which
//! are not safety-relevant and can tolerate batching.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::token::store::TokenStore;

#[derive(Debug, Clone, Copy)]
pub enum UsageKind {
    Request,
    CacheHit,
}

#[derive(Debug, Clone)]
pub struct UsageDelta {
    pub token: String,
    pub kind: UsageKind,
}

#[derive(Default)]
pub struct UsageStats {
    pub dropped: AtomicU64,
    pub flushed_batches: AtomicU64,
}

/// Bounded ring buffer + handle. A `tokio::sync::mpsc` channel's `try_send`
/// rejects the newest item on overflow; this evicts the oldest queued delta
/// instead, so the request path never blocks and the delta just pushed is
/// always accepted.
pub struct UsageAggregator {
    queue: Arc<Mutex<VecDeque<UsageDelta>>>,
    capacity: usize,
    notify: Arc<Notify>,
    stats: Arc<UsageStats>,
}

impl UsageAggregator {
    pub fn push(&self, delta: UsageDelta) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(delta);
        drop(queue);
        self.notify.notify_one();
    }

    pub fn stats(&self) -> Arc<UsageStats> {
        self.stats.clone()
    }
}

pub struct UsageFlusher {
    handle: tokio::task::JoinHandle<()>,
}

impl UsageFlusher {
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

/// Spawns the flusher and returns the aggregator handle callers push
/// deltas into, plus the background task handle.
pub fn spawn(
    store: Arc<dyn TokenStore>,
    capacity: usize,
    flush_interval: std::time::Duration,
    batch_size: usize,
) -> (UsageAggregator, UsageFlusher) {
    let queue = Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024))));
    let notify = Arc::new(Notify::new());
    let stats = Arc::new(UsageStats::default());

    let flusher_queue = queue.clone();
    let flusher_notify = notify.clone();
    let flusher_stats = stats.clone();

    let handle = tokio::spawn(async move {
        let mut requests: HashMap<String, u64> = HashMap::new();
        let mut cache_hits: HashMap<String, u64> = HashMap::new();
        let mut ticker = tokio::time::interval(flush_interval);

        loop {
            tokio::select! {
                _ = flusher_notify.notified() => {
                    drain_into(&flusher_queue, &mut requests, &mut cache_hits);
                    if requests.len() + cache_hits.len() >= batch_size {
                        flush(&store, &mut requests, &mut cache_hits, &flusher_stats).await;
                    }
                }
                _ = ticker.tick() => {
                    drain_into(&flusher_queue, &mut requests, &mut cache_hits);
                    flush(&store, &mut requests, &mut cache_hits, &flusher_stats).await;
                }
            }
        }
    });

    (UsageAggregator { queue, capacity, notify, stats }, UsageFlusher { handle })
}

fn drain_into(
    queue: &Mutex<VecDeque<UsageDelta>>,
    requests: &mut HashMap<String, u64>,
    cache_hits: &mut HashMap<String, u64>,
) {
    let drained: Vec<UsageDelta> = queue.lock().unwrap().drain(..).collect();
    for delta in drained {
        let table = match delta.kind {
            UsageKind::Request => &mut *requests,
            UsageKind::CacheHit => &mut *cache_hits,
        };
        *table.entry(delta.token).or_insert(0) += 1;
    }
}

async fn flush(
    store: &Arc<dyn TokenStore>,
    requests: &mut HashMap<String, u64>,
    cache_hits: &mut HashMap<String, u64>,
    stats: &Arc<UsageStats>,
) {
    if requests.is_empty() && cache_hits.is_empty() {
        return;
    }
    let now = Utc::now();
    if !requests.is_empty() {
        let batch = std::mem::take(requests);
        if let Err(err) = store.increment_usage_batch(batch, now).await {
            tracing::warn!(error = %err, "usage batch flush failed for unlimited-token requests, deltas dropped");
        }
    }
    if !cache_hits.is_empty() {
        let batch = std::mem::take(cache_hits);
        if let Err(err) = store.increment_cache_hits_batch(batch, now).await {
            tracing::warn!(error = %err, "usage batch flush failed for cache-hit counters, deltas dropped");
        }
    }
    stats.flushed_batches.fetch_add(1, Ordering::Relaxed);
}
