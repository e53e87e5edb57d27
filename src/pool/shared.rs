//! Thread-safe wrapper around a loader checkpoint.
//!
//! Epistemic foundation:
//! - K_i: All metadata mutation funnels through one mutex per checkpoint
//! - K_i: The lock is held only for O(1) set operations, never across I/O
//! - I^B: Concurrent flush requests coalesce onto the in-flight write

use crate::checkpoint::{CheckpointStore, LoaderCheckpoint};
use crate::models::{LoaderProgress, LoaderStatus, ProgressStats, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A loader checkpoint shared across concurrent workers.
///
/// Membership tests, marks, and counter reads are linearizable through a
/// single mutual-exclusion domain scoped to metadata only; the caller's item
/// processing runs entirely outside it. Raw sets never escape the lock
/// boundary.
pub struct SharedCheckpoint {
    store: Arc<CheckpointStore>,
    inner: Mutex<LoaderCheckpoint>,
    /// Serializes flushes; a second request waits for the in-flight write
    flush: tokio::sync::Mutex<()>,
    /// Cooperative cancellation, checked by workers between items
    cancelled: AtomicBool,
}

impl SharedCheckpoint {
    pub fn new(checkpoint: LoaderCheckpoint) -> Arc<Self> {
        Arc::new(Self {
            store: checkpoint.store(),
            inner: Mutex::new(checkpoint),
            flush: tokio::sync::Mutex::new(()),
            cancelled: AtomicBool::new(false),
        })
    }

    /// A worker that panicked while holding the lock must not wedge the
    /// ledger for the rest of the pool.
    fn lock(&self) -> MutexGuard<'_, LoaderCheckpoint> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn loader_name(&self) -> String {
        self.lock().loader_name().to_string()
    }

    /// Record the advisory item total (idempotent).
    pub fn set_total_items(&self, total: usize) {
        self.lock().set_total_items(total);
    }

    /// O(1) membership test.
    pub fn is_processed(&self, item_id: &str) -> bool {
        self.lock().is_processed(item_id)
    }

    /// Mark an item as processed.
    ///
    /// Returns true when the periodic flush is now due; the caller decides
    /// when to await `save_progress`.
    pub fn mark_processed(&self, item_id: &str) -> bool {
        self.lock().mark_processed(item_id)
    }

    /// Record a failure reason for an item; ignored when already processed.
    pub fn mark_failed(&self, item_id: &str, reason: &str) {
        self.lock().mark_failed(item_id, reason);
    }

    /// Current progress statistics.
    pub fn stats(&self) -> ProgressStats {
        self.lock().stats()
    }

    /// Clone of the underlying ledger, for summaries.
    pub fn progress_snapshot(&self) -> LoaderProgress {
        self.lock().progress().clone()
    }

    /// Flip the cancellation flag. Workers stop submitting new items;
    /// in-flight items run to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Flush the current snapshot, coalescing with any in-flight flush.
    ///
    /// If another worker is already writing, this waits for that write and
    /// returns without issuing a second one: the in-flight snapshot covers
    /// all marks made before it was taken, and later marks count toward the
    /// next periodic flush.
    pub async fn save_progress(&self) -> Result<()> {
        match self.flush.try_lock() {
            Ok(_guard) => self.write_snapshot(),
            Err(_) => {
                let _guard = self.flush.lock().await;
                Ok(())
            }
        }
    }

    /// Set the final loader status and force an unconditional flush, after
    /// any in-flight flush has drained.
    pub async fn finish(&self, status: LoaderStatus) -> Result<ProgressStats> {
        let _guard = self.flush.lock().await;
        self.lock().set_status(status);
        self.write_snapshot()?;
        Ok(self.stats())
    }

    /// Snapshot under the metadata lock, write outside it.
    fn write_snapshot(&self) -> Result<()> {
        let (run_id, snapshot, pending) = self.lock().begin_flush();
        self.store.save_loader(&run_id, &snapshot)?;
        self.lock().end_flush(pending);
        Ok(())
    }
}
