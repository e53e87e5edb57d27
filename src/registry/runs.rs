//! Run registry: lifecycle and discovery of runs.
//!
//! Epistemic foundation:
//! - K_i: Running → {Completed, Failed}; Failed → Running only via a
//!   successful compatibility validation; Completed is terminal
//! - B_i: An incomplete run may or may not exist → Option
//! - I^B: A torn run record surfaces as CorruptedState, never as "no run"

use crate::checkpoint::{CheckpointStore, LoaderCheckpoint};
use crate::models::{
    HervatError, LoaderProgress, LoaderStatus, Result, Run, RunConfig, RunStatus, RunSummary,
};
use crate::registry::compat;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle and discovery of runs.
///
/// One instance is constructed by the top-level orchestrator and passed down;
/// there is no ambient singleton.
pub struct RunRegistry {
    store: Arc<CheckpointStore>,
}

impl RunRegistry {
    pub fn new(store: Arc<CheckpointStore>) -> Self {
        Self { store }
    }

    /// The underlying store, shared with checkpoints handed out by this
    /// registry.
    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    /// Start a new run with a fresh id and an empty loader set.
    pub fn start_new_run(&self, label: &str, config: RunConfig) -> Result<Run> {
        let mut run = Run::new(label, config);

        // Millisecond-resolution ids can collide under rapid creation.
        let base = run.id.clone();
        let mut n = 1;
        while self.store.run_exists(&run.id) {
            run.id = format!("{base}-{n}");
            n += 1;
        }

        self.store.save_run(&run)?;
        info!(run_id = %run.id, config = %run.config.summary(), "Started new run");
        Ok(run)
    }

    /// Load a run by id.
    pub fn find_run(&self, run_id: &str) -> Result<Run> {
        self.store.load_run(run_id)
    }

    /// The most recently created run that is still running or failed.
    pub fn find_incomplete_run(&self) -> Result<Option<Run>> {
        for summary in self.store.list_runs()? {
            if matches!(summary.status, RunStatus::Running | RunStatus::Failed) {
                return self.store.load_run(&summary.id).map(Some);
            }
        }
        Ok(None)
    }

    /// Resume a run by id, or the most recent incomplete run when no id is
    /// given.
    ///
    /// Gated by the configuration validator: any fatal divergence between the
    /// stored snapshot and `candidate` refuses resumption before any item
    /// processing begins. Advisory keys (worker count, checkpoint interval)
    /// are taken from the candidate so a resume may change pacing.
    pub fn resume_run(&self, run_id: Option<&str>, candidate: &RunConfig) -> Result<Run> {
        let mut run = match run_id {
            Some(id) => self.store.load_run(id)?,
            None => self.find_incomplete_run()?.ok_or_else(|| {
                HervatError::NothingToResume("no incomplete runs found".to_string())
            })?,
        };

        if run.status == RunStatus::Completed {
            return Err(HervatError::NothingToResume(format!(
                "run {} already completed",
                run.id
            )));
        }

        let report = compat::validate(&run.config, candidate);
        if !report.is_compatible() {
            return Err(HervatError::ConfigMismatch {
                diffs: report.fatal,
            });
        }

        run.config.max_workers = candidate.max_workers;
        run.config.checkpoint_interval = candidate.checkpoint_interval;
        if run.status == RunStatus::Failed {
            run.status = RunStatus::Running;
            run.error = None;
        }
        run.updated_at = Utc::now();
        self.store.save_run(&run)?;

        info!(run_id = %run.id, loaders = run.loaders.len(), "Resuming run");
        Ok(run)
    }

    /// Obtain the checkpoint ledger for a loader, registering the loader on
    /// the run the first time it is touched.
    pub fn checkpoint(&self, run: &mut Run, loader_name: &str) -> Result<LoaderCheckpoint> {
        if run.register_loader(loader_name) {
            self.store.save_run(run)?;
        }
        LoaderCheckpoint::open(
            Arc::clone(&self.store),
            run,
            loader_name,
            run.config.checkpoint_interval,
        )
    }

    /// Mark a run completed. Refused unless every registered loader reports
    /// `Completed`.
    pub fn mark_run_complete(&self, run: &mut Run) -> Result<()> {
        if run.status != RunStatus::Running {
            return Err(HervatError::InvalidTransition {
                run_id: run.id.clone(),
                from: run.status,
                to: RunStatus::Completed,
            });
        }

        let loaders = self.store.load_loaders(&run.id)?;
        let pending: Vec<String> = run
            .loaders
            .iter()
            .filter(|name| {
                loaders
                    .get(*name)
                    .map(|p| p.status != LoaderStatus::Completed)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if !pending.is_empty() {
            return Err(HervatError::LoadersPending {
                run_id: run.id.clone(),
                pending,
            });
        }

        run.status = RunStatus::Completed;
        run.updated_at = Utc::now();
        self.store.save_run(run)?;
        info!(run_id = %run.id, "Run completed");
        Ok(())
    }

    /// Mark a run failed with a reason. A completed run is immutable.
    pub fn mark_run_failed(&self, run: &mut Run, reason: &str) -> Result<()> {
        if run.status == RunStatus::Completed {
            return Err(HervatError::InvalidTransition {
                run_id: run.id.clone(),
                from: run.status,
                to: RunStatus::Failed,
            });
        }

        run.status = RunStatus::Failed;
        run.error = Some(reason.to_string());
        run.updated_at = Utc::now();
        self.store.save_run(run)?;
        warn!(run_id = %run.id, reason, "Run failed");
        Ok(())
    }

    /// Summaries of all runs, most recent first.
    pub fn list_runs(&self) -> Result<Vec<RunSummary>> {
        self.store.list_runs()
    }

    /// A run together with all of its loader records.
    pub fn run_detail(&self, run_id: &str) -> Result<(Run, BTreeMap<String, LoaderProgress>)> {
        let run = self.store.load_run(run_id)?;
        let loaders = self.store.load_loaders(run_id)?;
        Ok((run, loaders))
    }

    /// Delete a run and all its loader records.
    pub fn delete_run(&self, run_id: &str) -> Result<()> {
        self.store.delete_run(run_id)?;
        info!(run_id, "Deleted run");
        Ok(())
    }

    /// Delete every run except the `keep` most recently created.
    ///
    /// Runs whose record can no longer be parsed are retired as well: they
    /// never show up in the listing, so they would otherwise survive every
    /// retention pass.
    ///
    /// Returns the ids of the deleted runs.
    pub fn cleanup(&self, keep: usize) -> Result<Vec<String>> {
        let runs = self.store.list_runs()?;
        let mut deleted = Vec::new();
        for summary in runs.iter().skip(keep) {
            self.store.delete_run(&summary.id)?;
            info!(run_id = %summary.id, "Cleaned up old run");
            deleted.push(summary.id.clone());
        }
        for run_id in self.store.list_unreadable_runs()? {
            self.store.delete_run(&run_id)?;
            warn!(run_id = %run_id, "Cleaned up run with unreadable record");
            deleted.push(run_id);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (TempDir, RunRegistry) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(CheckpointStore::new(temp_dir.path()).unwrap());
        (temp_dir, RunRegistry::new(store))
    }

    fn config() -> RunConfig {
        RunConfig {
            start_date: "2024-01-01".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_run_ids_are_unique() {
        let (_tmp, registry) = registry();
        let a = registry.start_new_run("a", config()).unwrap();
        let b = registry.start_new_run("b", config()).unwrap();
        let c = registry.start_new_run("c", config()).unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);
    }

    #[test]
    fn test_resume_matching_config() {
        let (_tmp, registry) = registry();
        let run = registry.start_new_run("ingest", config()).unwrap();

        let resumed = registry.resume_run(Some(&run.id), &config()).unwrap();
        assert_eq!(resumed.id, run.id);
        assert_eq!(resumed.status, RunStatus::Running);
    }

    #[test]
    fn test_resume_refuses_fatal_config_change() {
        let (_tmp, registry) = registry();
        let run = registry.start_new_run("ingest", config()).unwrap();

        let mut changed = config();
        changed.start_date = "2025-01-01".to_string();
        changed.overwrite = true;

        let err = registry.resume_run(Some(&run.id), &changed).unwrap_err();
        match err {
            HervatError::ConfigMismatch { ref diffs } => {
                let keys: Vec<&str> = diffs.iter().map(|d| d.key.as_str()).collect();
                assert_eq!(keys, vec!["start_date", "overwrite"]);
            }
            other => panic!("expected ConfigMismatch, got {other:?}"),
        }
        assert_eq!(err.exit_code(), 2);

        // The stored run is untouched by the refusal.
        let stored = registry.find_run(&run.id).unwrap();
        assert_eq!(stored.config.start_date, "2024-01-01");
    }

    #[test]
    fn test_resume_accepts_advisory_change() {
        let (_tmp, registry) = registry();
        let run = registry.start_new_run("ingest", config()).unwrap();

        let mut changed = config();
        changed.max_workers = 32;

        let resumed = registry.resume_run(Some(&run.id), &changed).unwrap();
        assert_eq!(resumed.config.max_workers, 32);
    }

    #[test]
    fn test_resume_completed_run_is_nothing_to_resume() {
        let (_tmp, registry) = registry();
        let mut run = registry.start_new_run("ingest", config()).unwrap();
        registry.mark_run_complete(&mut run).unwrap();

        let err = registry.resume_run(Some(&run.id), &config()).unwrap_err();
        assert!(matches!(err, HervatError::NothingToResume(_)));
    }

    #[test]
    fn test_resume_flips_failed_back_to_running() {
        let (_tmp, registry) = registry();
        let mut run = registry.start_new_run("ingest", config()).unwrap();
        registry.mark_run_failed(&mut run, "upstream down").unwrap();

        let resumed = registry.resume_run(None, &config()).unwrap();
        assert_eq!(resumed.id, run.id);
        assert_eq!(resumed.status, RunStatus::Running);
        assert!(resumed.error.is_none());
    }

    #[test]
    fn test_find_incomplete_skips_completed() {
        let (_tmp, registry) = registry();
        let old = registry.start_new_run("old", config()).unwrap();
        let mut done = registry.start_new_run("done", config()).unwrap();
        registry.mark_run_complete(&mut done).unwrap();

        let found = registry.find_incomplete_run().unwrap().unwrap();
        assert_eq!(found.id, old.id);
    }

    #[test]
    fn test_resume_without_incomplete_runs() {
        let (_tmp, registry) = registry();
        let err = registry.resume_run(None, &config()).unwrap_err();
        assert!(matches!(err, HervatError::NothingToResume(_)));
    }

    #[test]
    fn test_complete_refused_while_loaders_pending() {
        let (_tmp, registry) = registry();
        let mut run = registry.start_new_run("ingest", config()).unwrap();
        let mut cp = registry.checkpoint(&mut run, "zaken").unwrap();
        cp.mark_processed("z-1");
        cp.save_progress().unwrap();

        let err = registry.mark_run_complete(&mut run).unwrap_err();
        match err {
            HervatError::LoadersPending { pending, .. } => {
                assert_eq!(pending, vec!["zaken".to_string()]);
            }
            other => panic!("expected LoadersPending, got {other:?}"),
        }

        cp.finish(LoaderStatus::Completed).unwrap();
        registry.mark_run_complete(&mut run).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn test_completed_run_is_immutable() {
        let (_tmp, registry) = registry();
        let mut run = registry.start_new_run("ingest", config()).unwrap();
        registry.mark_run_complete(&mut run).unwrap();

        let err = registry.mark_run_failed(&mut run, "too late").unwrap_err();
        assert!(matches!(err, HervatError::InvalidTransition { .. }));
    }

    #[test]
    fn test_cleanup_retires_unreadable_run_records() {
        let (_tmp, registry) = registry();
        let healthy = registry.start_new_run("healthy", config()).unwrap();
        let torn = registry.start_new_run("torn", config()).unwrap();
        let record = registry.store().dir().join(&torn.id).join("run.json");
        std::fs::write(&record, "{ half a record").unwrap();

        // Retention well above the run count: only the torn run goes.
        let deleted = registry.cleanup(5).unwrap();
        assert_eq!(deleted, vec![torn.id.clone()]);

        assert!(registry.find_run(&healthy.id).is_ok());
        assert!(matches!(
            registry.find_run(&torn.id),
            Err(HervatError::RunNotFound(_))
        ));
        assert!(!registry.store().run_exists(&torn.id));
    }

    #[test]
    fn test_cleanup_keeps_most_recent() {
        let (_tmp, registry) = registry();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut run = registry.start_new_run(&format!("run-{i}"), config()).unwrap();
            // Force a strict creation order regardless of timer resolution.
            run.created_at = run.created_at + chrono::Duration::seconds(i);
            registry.store().save_run(&run).unwrap();
            let mut cp = registry.checkpoint(&mut run, "zaken").unwrap();
            cp.save_progress().unwrap();
            ids.push(run.id);
        }

        let deleted = registry.cleanup(2).unwrap();
        assert_eq!(deleted.len(), 3);

        let remaining: Vec<String> =
            registry.list_runs().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(remaining, vec![ids[4].clone(), ids[3].clone()]);
        for id in &ids[0..3] {
            assert!(matches!(
                registry.find_run(id),
                Err(HervatError::RunNotFound(_))
            ));
            assert!(registry.store().load_loaders(id).unwrap().is_empty());
        }
    }
}
