//! Run and per-loader progress records.
//!
//! Epistemic foundation:
//! - K_i: A run id is derived from its creation time
//! - K_i: Once an item key is processed it never regresses ("processed wins")
//! - B_i: total_items is an advisory hint, never authoritative

use crate::models::RunConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Status of a run across all its loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// In progress, or interrupted without a recorded failure
    Running,
    /// Every registered loader completed; terminal
    Completed,
    /// At least one loader failed; resumable
    Failed,
}

/// Status of a single loader within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderStatus {
    InProgress,
    Completed,
    Failed,
}

/// One end-to-end invocation across all loaders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Creation-time-derived identifier
    pub id: String,
    /// Operator-supplied description
    #[serde(default)]
    pub label: String,
    /// Current status
    pub status: RunStatus,
    /// Configuration snapshot, validated on resume
    pub config: RunConfig,
    /// Loader names registered so far, in registration order
    #[serde(default)]
    pub loaders: Vec<String>,
    /// When the run was created
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Failure reason, if the run was marked failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Run {
    /// Create a new run with a fresh creation-time-derived id.
    pub fn new(label: &str, config: RunConfig) -> Self {
        let now = Utc::now();
        Self {
            id: derive_run_id(now),
            label: label.to_string(),
            status: RunStatus::Running,
            config,
            loaders: Vec::new(),
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Whether this run can be picked up by a resume.
    pub fn is_resumable(&self) -> bool {
        matches!(self.status, RunStatus::Running | RunStatus::Failed)
    }

    /// Register a loader name; registering twice is a no-op.
    ///
    /// Returns true if the loader was newly registered.
    pub fn register_loader(&mut self, name: &str) -> bool {
        if self.loaders.iter().any(|l| l == name) {
            return false;
        }
        self.loaders.push(name.to_string());
        self.updated_at = Utc::now();
        true
    }

    /// Summary view for run listings.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            label: self.label.clone(),
            status: self.status,
            created_at: self.created_at,
            loaders: self.loaders.clone(),
        }
    }
}

/// Derive a run id from its creation time.
pub fn derive_run_id(at: DateTime<Utc>) -> String {
    format!("run_{}", at.format("%Y%m%d_%H%M%S_%3f"))
}

/// Summary of a run for listings, most recent first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub loaders: Vec<String>,
}

/// Progress ledger for one loader within a run.
///
/// Owned exclusively by its run: created lazily when the loader first runs,
/// deleted only together with the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderProgress {
    /// Loader name
    pub loader_name: String,
    /// Advisory total, set at most once per run
    #[serde(default)]
    pub total_items: Option<usize>,
    /// Composite keys of successfully processed items
    #[serde(default)]
    pub processed_ids: HashSet<String>,
    /// Item key → last failure reason
    #[serde(default)]
    pub failed_ids: HashMap<String, String>,
    /// Current status
    pub status: LoaderStatus,
    /// When this ledger was last flushed to disk
    pub last_checkpoint_at: DateTime<Utc>,
}

impl LoaderProgress {
    /// Create an empty ledger for a loader.
    pub fn new(loader_name: &str) -> Self {
        Self {
            loader_name: loader_name.to_string(),
            total_items: None,
            processed_ids: HashSet::new(),
            failed_ids: HashMap::new(),
            status: LoaderStatus::InProgress,
            last_checkpoint_at: Utc::now(),
        }
    }

    /// Record the advisory item total. Idempotent; a conflicting second call
    /// keeps the first value and logs a warning.
    pub fn set_total_items(&mut self, total: usize) {
        match self.total_items {
            None => self.total_items = Some(total),
            Some(existing) if existing == total => {}
            Some(existing) => {
                warn!(
                    loader = %self.loader_name,
                    existing,
                    requested = total,
                    "total_items already set with a different value, keeping original"
                );
            }
        }
    }

    /// O(1) membership test, safe before any processing.
    pub fn is_processed(&self, item_id: &str) -> bool {
        self.processed_ids.contains(item_id)
    }

    /// Mark an item as processed. Evicts the item from the failed set;
    /// marking twice is a no-op beyond the first.
    ///
    /// Returns true if the item was newly added.
    pub fn mark_processed(&mut self, item_id: &str) -> bool {
        let added = self.processed_ids.insert(item_id.to_string());
        if added {
            self.failed_ids.remove(item_id);
        }
        added
    }

    /// Record a failure reason for an item, unless the item is already
    /// processed (processed is authoritative and must never regress).
    ///
    /// Returns true if the failure was recorded.
    pub fn mark_failed(&mut self, item_id: &str, reason: &str) -> bool {
        if self.processed_ids.contains(item_id) {
            return false;
        }
        self.failed_ids
            .insert(item_id.to_string(), reason.to_string());
        true
    }

    /// Current progress statistics.
    pub fn stats(&self) -> ProgressStats {
        let processed_count = self.processed_ids.len();
        let total_items = self.total_items.unwrap_or(0);
        let completion_pct = if total_items > 0 {
            (processed_count as f64 / total_items as f64) * 100.0
        } else {
            0.0
        };

        ProgressStats {
            processed_count,
            failed_count: self.failed_ids.len(),
            total_items,
            completion_pct,
        }
    }
}

/// Snapshot of a loader's progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressStats {
    pub processed_count: usize,
    pub failed_count: usize,
    /// 0 when no advisory total was recorded
    pub total_items: usize,
    pub completion_pct: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_processed_idempotent() {
        let mut progress = LoaderProgress::new("activiteiten");
        assert!(progress.mark_processed("a-1"));
        assert!(!progress.mark_processed("a-1"));
        assert_eq!(progress.stats().processed_count, 1);
    }

    #[test]
    fn test_processed_wins_over_failed() {
        let mut progress = LoaderProgress::new("zaken");
        progress.mark_failed("z-1", "timeout");
        assert_eq!(progress.stats().failed_count, 1);

        progress.mark_processed("z-1");
        assert!(progress.is_processed("z-1"));
        assert_eq!(progress.stats().failed_count, 0);

        // A later failure for a processed item must be ignored.
        assert!(!progress.mark_failed("z-1", "flaky retry"));
        assert!(progress.is_processed("z-1"));
        assert_eq!(progress.stats().failed_count, 0);
    }

    #[test]
    fn test_total_items_set_once() {
        let mut progress = LoaderProgress::new("documenten");
        progress.set_total_items(100);
        progress.set_total_items(250);
        assert_eq!(progress.total_items, Some(100));
    }

    #[test]
    fn test_completion_pct() {
        let mut progress = LoaderProgress::new("documenten");
        progress.set_total_items(4);
        progress.mark_processed("d-1");
        progress.mark_processed("d-2");
        let stats = progress.stats();
        assert_eq!(stats.processed_count, 2);
        assert!((stats.completion_pct - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_register_loader_dedups() {
        let mut run = Run::new("test", RunConfig::default());
        assert!(run.register_loader("zaken"));
        assert!(!run.register_loader("zaken"));
        assert_eq!(run.loaders, vec!["zaken".to_string()]);
    }
}
