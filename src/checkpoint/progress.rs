//! Per-loader checkpoint ledger with periodic flushing.
//!
//! Epistemic foundation:
//! - K_i: The ledger flushes at least once per `interval` processed items
//! - K_i: The final flush on finish is unconditional
//! - I^B: A failed flush keeps in-memory state; the next flush retries

use crate::checkpoint::CheckpointStore;
use crate::models::{LoaderProgress, LoaderStatus, ProgressStats, Result, Run};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Progress ledger for one loader, bound to a run and a store.
///
/// Mutation goes through this type only; the underlying `LoaderProgress`
/// never leaves it mutably.
pub struct LoaderCheckpoint {
    store: Arc<CheckpointStore>,
    run_id: String,
    progress: LoaderProgress,
    /// Successfully processed items per periodic flush
    interval: usize,
    /// Newly processed items since the last successful flush
    unflushed: usize,
}

impl LoaderCheckpoint {
    /// Open the ledger for a loader, rehydrating an existing record or
    /// creating a fresh one on first touch.
    pub fn open(
        store: Arc<CheckpointStore>,
        run: &Run,
        loader_name: &str,
        interval: usize,
    ) -> Result<Self> {
        let progress = match store.load_loader(&run.id, loader_name)? {
            Some(progress) => {
                info!(
                    run_id = %run.id,
                    loader = loader_name,
                    processed = progress.processed_ids.len(),
                    failed = progress.failed_ids.len(),
                    "Rehydrated loader checkpoint"
                );
                progress
            }
            None => LoaderProgress::new(loader_name),
        };

        Ok(Self {
            store,
            run_id: run.id.clone(),
            progress,
            interval: interval.max(1),
            unflushed: 0,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn loader_name(&self) -> &str {
        &self.progress.loader_name
    }

    /// Read-only view of the underlying ledger.
    pub fn progress(&self) -> &LoaderProgress {
        &self.progress
    }

    /// Record the advisory item total (idempotent, see `LoaderProgress`).
    pub fn set_total_items(&mut self, total: usize) {
        self.progress.set_total_items(total);
    }

    /// O(1) membership test, safe before any processing.
    pub fn is_processed(&self, item_id: &str) -> bool {
        self.progress.is_processed(item_id)
    }

    /// Mark an item as processed.
    ///
    /// Returns true when the periodic flush is now due.
    pub fn mark_processed(&mut self, item_id: &str) -> bool {
        if self.progress.mark_processed(item_id) {
            self.unflushed += 1;
        }
        self.flush_due()
    }

    /// Record a failure reason for an item; ignored when already processed.
    pub fn mark_failed(&mut self, item_id: &str, reason: &str) {
        self.progress.mark_failed(item_id, reason);
    }

    /// Whether enough items were processed to warrant a periodic flush.
    pub fn flush_due(&self) -> bool {
        self.unflushed >= self.interval
    }

    /// Flush the current snapshot to the store.
    ///
    /// On failure the in-memory state and the unflushed counter are kept, so
    /// the next periodic flush (or the final one) retries the write.
    pub fn save_progress(&mut self) -> Result<()> {
        let (run_id, snapshot, pending) = self.begin_flush();
        self.store.save_loader(&run_id, &snapshot)?;
        self.end_flush(pending);
        Ok(())
    }

    /// Flush only when the periodic interval has been reached.
    ///
    /// Returns true if a flush was performed.
    pub fn save_if_due(&mut self) -> Result<bool> {
        if !self.flush_due() {
            return Ok(false);
        }
        self.save_progress()?;
        Ok(true)
    }

    /// Set the final loader status and flush unconditionally.
    pub fn finish(&mut self, status: LoaderStatus) -> Result<ProgressStats> {
        self.progress.status = status;
        self.save_progress()?;
        let stats = self.stats();
        debug!(
            run_id = %self.run_id,
            loader = %self.progress.loader_name,
            processed = stats.processed_count,
            failed = stats.failed_count,
            ?status,
            "Loader checkpoint finished"
        );
        Ok(stats)
    }

    /// Current progress statistics.
    pub fn stats(&self) -> ProgressStats {
        self.progress.stats()
    }

    /// Snapshot the ledger for writing, stamping the checkpoint time.
    ///
    /// Split from `end_flush` so a concurrent wrapper can serialize outside
    /// its metadata lock. `pending` is the unflushed count covered by the
    /// snapshot; only that many are subtracted on success, so marks landing
    /// during a flush still count toward the next one.
    pub(crate) fn begin_flush(&mut self) -> (String, LoaderProgress, usize) {
        self.progress.last_checkpoint_at = Utc::now();
        (self.run_id.clone(), self.progress.clone(), self.unflushed)
    }

    pub(crate) fn end_flush(&mut self, flushed: usize) {
        self.unflushed = self.unflushed.saturating_sub(flushed);
    }

    pub(crate) fn store(&self) -> Arc<CheckpointStore> {
        Arc::clone(&self.store)
    }

    pub(crate) fn set_status(&mut self, status: LoaderStatus) {
        self.progress.status = status;
    }
}
