// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Disk-durable queue backed by an embedded key-value store.
//!
//! # Storage layout
//!
//! ```text
//!   queue/{8-byte big-endian ID}  serialized batch
//!   lock/{8-byte big-endian ID}   claim marker, valued with an expiry deadline
//! ```
//!
//! IDs come from the store's persisted, block-reserved sequence and strictly
//! increase across process restarts. A single dequeuer scans `queue`
//! oldest-first and claims every entry lacking a live lock with a
//! compare-and-swap on the lock marker, so racing claims get exactly one
//! winner per entry; losers skip it and pick it up on a later scan if the
//! winner never acknowledges. Claimed entries are dispatched to a worker
//! pool; resolved entries post their ID to a single acker, which deletes
//! entry and lock in one transaction.
//!
//! On startup all lock markers are removed: entries claimed by a worker that
//! died before acknowledging become claimable again. Delivery is therefore
//! at-least-once, never at-most-once: a crash during in-flight processing
//! can produce a duplicate forward.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sled::transaction::TransactionError;
use sled::Transactional;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{BatchProcessor, SpanQueue};
use crate::config::StorageConfig;
use crate::error::{QueueError, StorageError};
use crate::metrics::{Gauge, MetricsSink};
use crate::model::Batch;

const ENTRIES_TREE: &str = "queue";
const LOCKS_TREE: &str = "lock";
const DEPTH_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// How long a claim may stay unacknowledged before the entry becomes
/// claimable again.
const LOCK_TTL: Duration = Duration::from_secs(60 * 60);

struct ClaimedEntry {
    transaction_id: u64,
    batch: Batch,
}

/// Disk-backed queue that survives restarts, trading throughput for
/// durability.
pub struct PersistentQueue {
    db: sled::Db,
    entries: sled::Tree,
    locks: sled::Tree,
    depth: Arc<AtomicI64>,
    notify: Arc<Notify>,
    sync_writes: bool,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

fn entry_key(transaction_id: u64) -> [u8; 8] {
    transaction_id.to_be_bytes()
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn lock_is_live(value: &[u8], now_millis: u64) -> bool {
    match <[u8; 8]>::try_from(value) {
        Ok(raw) => u64::from_be_bytes(raw) > now_millis,
        Err(_) => false,
    }
}

/// Scans the entries oldest-first and claims up to `max` of them by writing
/// lock markers. Exactly one of any number of racing claimers wins the swap
/// for a given entry; the losers skip it.
fn claim_batch(
    entries: &sled::Tree,
    locks: &sled::Tree,
    max: usize,
) -> Result<Vec<ClaimedEntry>, StorageError> {
    let mut claimed = Vec::new();
    let now = unix_millis(SystemTime::now());
    let expiry = now + LOCK_TTL.as_millis() as u64;

    for kv in entries.iter() {
        let (key, value) = kv?;
        let current_lock = locks.get(&key)?;
        if let Some(ref lock) = current_lock {
            if lock_is_live(lock, now) {
                continue;
            }
        }
        let swap = locks.compare_and_swap(&key, current_lock, Some(&expiry.to_be_bytes()[..]))?;
        if swap.is_err() {
            // Lost the race for this entry.
            continue;
        }

        let raw_key: [u8; 8] = match key.as_ref().try_into() {
            Ok(raw) => raw,
            Err(_) => continue,
        };
        let batch = bincode::deserialize::<Batch>(&value)?;
        claimed.push(ClaimedEntry {
            transaction_id: u64::from_be_bytes(raw_key),
            batch,
        });
        if claimed.len() == max {
            break;
        }
    }
    Ok(claimed)
}

impl PersistentQueue {
    /// Opens the store, releases locks left behind by a previous run, and
    /// starts the dequeuer, worker pool, acker, and depth reporter.
    pub async fn start(
        storage: &StorageConfig,
        workers: usize,
        processor: Arc<dyn BatchProcessor>,
        metrics: Arc<dyn MetricsSink>,
        cancel: CancellationToken,
    ) -> Result<Self, StorageError> {
        let workers = workers.max(1);
        let db = sled::Config::new().path(&storage.directory).open()?;
        let entries = db.open_tree(ENTRIES_TREE)?;
        let locks = db.open_tree(LOCKS_TREE)?;

        // A worker may have died mid-processing before the last shutdown;
        // dropping its lock makes the entry claimable again.
        let stale_locks = locks.len();
        locks.clear()?;
        if stale_locks > 0 {
            info!(stale_locks, "released lock markers from a previous run");
        }

        let depth = Arc::new(AtomicI64::new(entries.len() as i64));
        let notify = Arc::new(Notify::new());
        let (work_tx, work_rx) = mpsc::channel::<ClaimedEntry>(workers);
        let (ack_tx, mut ack_rx) = mpsc::channel::<u64>(workers);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));

        let mut tasks = Vec::with_capacity(workers + 3);

        // Dequeuer: one scanner keeps the racing of concurrent workers on
        // the channel instead of the store.
        {
            let entries = entries.clone();
            let locks = locks.clone();
            let notify = Arc::clone(&notify);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let claim = {
                        let entries = entries.clone();
                        let locks = locks.clone();
                        tokio::task::spawn_blocking(move || {
                            claim_batch(&entries, &locks, workers)
                        })
                        .await
                    };
                    let claimed = match claim {
                        Ok(Ok(claimed)) => claimed,
                        Ok(Err(err)) => {
                            error!(error = %err, "could not dequeue next entry from storage");
                            Vec::new()
                        }
                        Err(err) => {
                            error!(error = %err, "dequeue task failed");
                            break;
                        }
                    };

                    let drained = claimed.len() < workers;
                    for entry in claimed {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            sent = work_tx.send(entry) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    if drained {
                        // Queue cleared for now; sleep until new work
                        // arrives. Redundant wake-ups collapse into one
                        // stored permit.
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = notify.notified() => {}
                        }
                    }
                }
            }));
        }

        // Processing workers.
        for _ in 0..workers {
            let work_rx = Arc::clone(&work_rx);
            let ack_tx = ack_tx.clone();
            let processor = Arc::clone(&processor);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = async {
                            let mut work_rx = work_rx.lock().await;
                            work_rx.recv().await
                        } => received,
                    };
                    let Some(entry) = received else { break };
                    let outcome = processor.process(entry.batch).await;
                    if outcome.is_resolved() {
                        if ack_tx.send(entry.transaction_id).await.is_err() {
                            break;
                        }
                    }
                    // Unresolved entries keep their lock; the next startup
                    // releases it and they are delivered again.
                }
            }));
        }
        drop(ack_tx);

        // Acker: deletes entry and lock in one transaction per resolved ID.
        {
            let db = db.clone();
            let entries = entries.clone();
            let locks = locks.clone();
            let depth = Arc::clone(&depth);
            let cancel = cancel.clone();
            let sync_writes = storage.sync_writes;
            tasks.push(tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = ack_rx.recv() => received,
                    };
                    let Some(transaction_id) = received else { break };
                    let key = entry_key(transaction_id);
                    let result: Result<(), TransactionError<()>> = (&entries, &locks)
                        .transaction(|(tx_entries, tx_locks)| {
                            tx_entries.remove(&key[..])?;
                            tx_locks.remove(&key[..])?;
                            Ok(())
                        });
                    match result {
                        Ok(()) => {
                            depth.fetch_sub(1, Ordering::SeqCst);
                            if sync_writes {
                                if let Err(err) = db.flush_async().await {
                                    error!(error = %err, "failed to flush store after acknowledgment");
                                }
                            }
                        }
                        Err(err) => {
                            let err = StorageError::from(err);
                            error!(error = %err, "could not remove acknowledged entry from storage");
                        }
                    }
                }
            }));
        }

        // Depth reporter.
        {
            let depth = Arc::clone(&depth);
            let metrics = Arc::clone(&metrics);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(DEPTH_REPORT_INTERVAL);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tick.tick() => {
                            metrics.record(Gauge::QueueDepth, depth.load(Ordering::SeqCst).max(0) as u64);
                        }
                    }
                }
            }));
        }

        Ok(PersistentQueue {
            db,
            entries,
            locks,
            depth,
            notify,
            sync_writes: storage.sync_writes,
            cancel,
            tasks: tokio::sync::Mutex::new(tasks),
        })
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

#[async_trait]
impl SpanQueue for PersistentQueue {
    async fn enqueue(&self, batch: Batch) -> Result<(), QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Closed);
        }
        let transaction_id = self.db.generate_id().map_err(StorageError::Engine)?;
        let payload = bincode::serialize(&batch).map_err(StorageError::Codec)?;
        self.entries
            .insert(entry_key(transaction_id), payload)
            .map_err(StorageError::Engine)?;
        if self.sync_writes {
            self.db.flush_async().await.map_err(StorageError::Engine)?;
        }
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
        self.db.flush_async().await.map_err(StorageError::Engine)?;
        debug!("persistent queue stopped");
        Ok(())
    }
}
