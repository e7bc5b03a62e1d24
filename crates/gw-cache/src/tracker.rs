//! Asynchronous best-effort access tracker (§4.3, §5).
//!
//! `record` is synchronous and non-blocking: it is called from the cache's
//! hot `get`/`set` path, so it can never suspend on the tracker's channel.
//! A bounded `mpsc` channel (default capacity 10 000) decouples producers
//! from the background flusher; on overflow, updates are silently dropped
//! and counted rather than applying backpressure to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gw_core::tenant::TenantId;
use gw_core::KeyValueStore;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::EvictionReport;

#[derive(Debug, Clone)]
struct AccessRecord {
    tenant: TenantId,
    key: String,
}

pub struct AccessTracker {
    sender: mpsc::Sender<AccessRecord>,
    receiver: std::sync::Mutex<Option<mpsc::Receiver<AccessRecord>>>,
    dropped: Arc<AtomicU64>,
}

impl AccessTracker {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        AccessTracker {
            sender: tx,
            receiver: std::sync::Mutex::new(Some(rx)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Best-effort: uses `try_send` so a full channel never blocks the
    /// caller. Overflow is counted via `dropped_count`.
    pub fn record(&self, tenant: TenantId, key: String) {
        match self.sender.try_send(AccessRecord { tenant, key }) {
            Ok(()) => {}
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawns the background flusher: batches per-tenant access records and
    /// writes them to the per-tenant sorted index every `flush_interval` or
    /// once a tenant's batch reaches `batch_size`, whichever comes first
    /// (§4.3). Consumes the tracker's receiver, so this may only be called
    /// once per tracker.
    pub fn spawn_flusher(
        &self,
        store: Arc<dyn KeyValueStore>,
        prefix: String,
        flush_interval: Duration,
        batch_size: usize,
    ) -> tokio::task::JoinHandle<()> {
        let mut receiver = self
            .receiver
            .lock()
            .expect("tracker receiver mutex poisoned")
            .take()
            .expect("spawn_flusher called more than once");

        tokio::spawn(async move {
            let mut batches: HashMap<TenantId, Vec<String>> = HashMap::new();
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    record = receiver.recv() => {
                        match record {
                            Some(r) => {
                                let batch = batches.entry(r.tenant).or_default();
                                batch.push(r.key);
                                if batch.len() >= batch_size {
                                    let tenant = r.tenant;
                                    let batch = batches.remove(&tenant).unwrap_or_default();
                                    flush_batch(store.as_ref(), &prefix, tenant, batch).await;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let drained: Vec<(TenantId, Vec<String>)> = batches.drain().collect();
                        for (tenant, batch) in drained {
                            flush_batch(store.as_ref(), &prefix, tenant, batch).await;
                        }
                    }
                }
            }
        })
    }
}

async fn flush_batch(store: &dyn KeyValueStore, prefix: &str, tenant: TenantId, batch: Vec<String>) {
    if batch.is_empty() {
        return;
    }
    let index_key = gw_core::cache::lru_index_key(prefix, tenant);
    let now = Utc::now().timestamp();
    let mut failed = 0u32;
    for key in &batch {
        if store.zadd(&index_key, now, key).await.is_err() {
            failed += 1;
        }
    }
    if failed > 0 {
        warn!(tenant = %tenant, failed, "access tracker flush: partial failure");
    } else {
        debug!(tenant = %tenant, count = batch.len(), "access tracker flushed batch");
    }
}

/// Convenience summary type shared with `eviction` for the metrics this
/// module and the eviction sweep both expose (§4.3 "metrics record success
/// and failure counts").
pub type FlushReport = EvictionReport;
