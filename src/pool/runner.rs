//! Bounded worker-pool runner for checkpointed loaders.
//!
//! The explicit replacement for "wrap any function with checkpointing"
//! decorators: the orchestrator calls `with_checkpoint` per loader, handing
//! over the items and an opaque async processing callback. The engine tracks
//! membership, flushes periodically, and never looks inside the callback.

use crate::models::{HervatError, LoaderStatus, ProgressStats, Result, Run};
use crate::pool::SharedCheckpoint;
use crate::registry::RunRegistry;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Final report for one `with_checkpoint` invocation.
#[derive(Debug, Clone)]
pub struct LoaderOutcome {
    pub loader: String,
    pub status: LoaderStatus,
    pub stats: ProgressStats,
    /// Items not submitted this invocation: configured front-skip plus
    /// items already processed by an earlier invocation
    pub skipped: usize,
    /// Loader-wide failure reason, when the pool was cancelled
    pub error: Option<String>,
}

impl LoaderOutcome {
    pub fn is_failed(&self) -> bool {
        self.status == LoaderStatus::Failed
    }
}

/// Run a loader's items through a bounded worker pool with checkpointing.
///
/// Semantics:
/// - the loader is registered on the run and its ledger opened (or
///   rehydrated) before any item is touched
/// - the configured per-loader skip count drops items from the front
/// - already-processed items are skipped without invoking the callback
/// - a callback error is recorded via `mark_failed` and processing
///   continues, unless `HervatError::is_fatal` holds, in which case the
///   cancellation flag flips, no new items are submitted, in-flight items
///   drain, and the loader is marked failed
/// - the final flush runs unconditionally, success or failure
///
/// The shared checkpoint is passed to the callback as an explicit capability
/// object; there is no ambient lookup. Item failures never escalate beyond
/// the returned outcome, so sibling loaders are unaffected.
pub async fn with_checkpoint<T, K, F, Fut>(
    registry: &RunRegistry,
    run: &mut Run,
    loader_name: &str,
    items: Vec<T>,
    item_key: K,
    process: F,
) -> Result<LoaderOutcome>
where
    T: Send + 'static,
    K: Fn(&T) -> String,
    F: Fn(Arc<SharedCheckpoint>, T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let total = items.len();
    let checkpoint = registry.checkpoint(run, loader_name)?;

    if checkpoint.progress().status == LoaderStatus::Completed {
        info!(loader = loader_name, "Loader already completed, skipping");
        return Ok(LoaderOutcome {
            loader: loader_name.to_string(),
            status: LoaderStatus::Completed,
            stats: checkpoint.stats(),
            skipped: total,
            error: None,
        });
    }

    let shared = SharedCheckpoint::new(checkpoint);
    shared.set_total_items(total);

    let skip = run.config.skip_for(loader_name);
    if skip >= total && total > 0 {
        warn!(
            loader = loader_name,
            skip, total, "Skip count covers every item, nothing to process"
        );
    }

    let workers = run.config.max_workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    info!(
        loader = loader_name,
        total,
        skip,
        workers,
        "Starting checkpointed loader"
    );

    let mut handles = Vec::new();
    let mut skipped = skip.min(total);

    for item in items.into_iter().skip(skip) {
        if shared.is_cancelled() {
            break;
        }
        let key = item_key(&item);
        if shared.is_processed(&key) {
            skipped += 1;
            continue;
        }

        // Acquiring before spawning bounds in-flight work to the pool size.
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|_| HervatError::Internal("Semaphore closed".to_string()))?;

        let shared_task = Arc::clone(&shared);
        let process = process.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            if shared_task.is_cancelled() {
                return None;
            }

            match process(Arc::clone(&shared_task), item).await {
                Ok(()) => {
                    if shared_task.mark_processed(&key) {
                        if let Err(e) = shared_task.save_progress().await {
                            warn!(error = %e, "Periodic checkpoint flush failed, will retry");
                        }
                    }
                    None
                }
                Err(e) if e.is_fatal() => {
                    shared_task.cancel();
                    Some(e.to_string())
                }
                Err(e) => {
                    shared_task.mark_failed(&key, &e.to_string());
                    None
                }
            }
        }));
    }

    // Drain: items already in flight run to completion.
    let mut fatal: Option<String> = None;
    for handle in handles {
        match handle.await {
            Ok(Some(reason)) => {
                fatal.get_or_insert(reason);
            }
            Ok(None) => {}
            Err(e) => {
                shared.cancel();
                fatal.get_or_insert(format!("worker panicked: {e}"));
            }
        }
    }

    let status = if shared.is_cancelled() {
        LoaderStatus::Failed
    } else {
        LoaderStatus::Completed
    };
    let stats = shared.finish(status).await?;

    // Failures are never dropped silently: enumerate every reason.
    let snapshot = shared.progress_snapshot();
    if !snapshot.failed_ids.is_empty() {
        warn!(
            loader = loader_name,
            failed = snapshot.failed_ids.len(),
            "Items failed during processing"
        );
        for (item_id, reason) in &snapshot.failed_ids {
            warn!(loader = loader_name, item = %item_id, %reason, "Item failed");
        }
    }

    info!(
        loader = loader_name,
        processed = stats.processed_count,
        failed = stats.failed_count,
        skipped,
        completion = %format!("{:.1}%", stats.completion_pct),
        ?status,
        "Loader finished"
    );

    Ok(LoaderOutcome {
        loader: loader_name.to_string(),
        status,
        stats,
        skipped,
        error: fatal,
    })
}
