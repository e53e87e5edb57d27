//! Durable storage for run and loader records.
//!
//! Epistemic foundation:
//! - K_i: Records are persisted atomically (write-then-rename)
//! - B_i: A record may not exist → RunNotFound / Option
//! - I^B: Crash during write → the previous snapshot stays readable
//!
//! Layout is one directory per run, human-inspectable JSON inside:
//!
//! ```text
//! checkpoints/
//!   run_20240101_120000_000/
//!     run.json                    run record (status, config snapshot, loaders)
//!     loader_activiteiten.json    one record per loader
//! ```
//!
//! Loader records carry a `loader_` prefix so no loader name can collide
//! with the reserved run record.

use crate::models::{HervatError, LoaderProgress, Result, Run, RunSummary};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RUN_RECORD: &str = "run.json";

/// Atomic, file-backed storage for checkpoint records.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| HervatError::io("creating checkpoint dir", e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.dir.join(run_id)
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(RUN_RECORD)
    }

    fn loader_path(&self, run_id: &str, loader_name: &str) -> PathBuf {
        self.run_dir(run_id).join(format!("loader_{loader_name}.json"))
    }

    /// Whether a run record exists.
    pub fn run_exists(&self, run_id: &str) -> bool {
        self.run_path(run_id).exists()
    }

    /// Persist a run record.
    pub fn save_run(&self, run: &Run) -> Result<()> {
        let dir = self.run_dir(&run.id);
        fs::create_dir_all(&dir).map_err(|e| HervatError::io("creating run dir", e))?;
        write_atomic(&self.run_path(&run.id), run)?;
        debug!(run_id = %run.id, "Run record saved");
        Ok(())
    }

    /// Load a run record.
    ///
    /// A missing record is `RunNotFound`; a record that exists but fails to
    /// parse is `CorruptedState`. Callers must not treat the latter as "no
    /// prior state".
    pub fn load_run(&self, run_id: &str) -> Result<Run> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Err(HervatError::RunNotFound(run_id.to_string()));
        }
        read_record(&path)
    }

    /// Persist a loader record for a run.
    pub fn save_loader(&self, run_id: &str, progress: &LoaderProgress) -> Result<()> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir).map_err(|e| HervatError::io("creating run dir", e))?;
        write_atomic(&self.loader_path(run_id, &progress.loader_name), progress)?;
        debug!(run_id, loader = %progress.loader_name, "Loader record saved");
        Ok(())
    }

    /// Load the record for one loader, if it exists.
    pub fn load_loader(&self, run_id: &str, loader_name: &str) -> Result<Option<LoaderProgress>> {
        let path = self.loader_path(run_id, loader_name);
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    /// Load every loader record belonging to a run, keyed by loader name.
    pub fn load_loaders(&self, run_id: &str) -> Result<BTreeMap<String, LoaderProgress>> {
        let dir = self.run_dir(run_id);
        let mut loaders = BTreeMap::new();
        if !dir.exists() {
            return Ok(loaders);
        }

        let entries =
            fs::read_dir(&dir).map_err(|e| HervatError::io("listing run directory", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| HervatError::io("listing run directory", e))?;
            let path = entry.path();
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !file_name.starts_with("loader_") || !file_name.ends_with(".json") {
                continue;
            }
            let progress: LoaderProgress = read_record(&path)?;
            loaders.insert(progress.loader_name.clone(), progress);
        }
        Ok(loaders)
    }

    /// Summaries of all runs, most recently created first.
    ///
    /// A run directory whose record cannot be parsed is logged and skipped
    /// here so one torn run does not hide the rest of the listing; loading
    /// it explicitly still reports `CorruptedState`.
    pub fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let entries =
            fs::read_dir(&self.dir).map_err(|e| HervatError::io("listing checkpoint dir", e))?;

        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HervatError::io("listing checkpoint dir", e))?;
            let record = entry.path().join(RUN_RECORD);
            if !record.is_file() {
                continue;
            }
            match read_record::<Run>(&record) {
                Ok(run) => summaries.push(run.summary()),
                Err(e) => {
                    warn!(path = %record.display(), error = %e, "Skipping unreadable run record");
                }
            }
        }

        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(summaries)
    }

    /// Ids of run directories whose record exists but cannot be parsed.
    ///
    /// These never appear in `list_runs`, so retention has to discover them
    /// separately or a torn run would survive every cleanup pass.
    pub fn list_unreadable_runs(&self) -> Result<Vec<String>> {
        let entries =
            fs::read_dir(&self.dir).map_err(|e| HervatError::io("listing checkpoint dir", e))?;

        let mut unreadable = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HervatError::io("listing checkpoint dir", e))?;
            let record = entry.path().join(RUN_RECORD);
            if !record.is_file() {
                continue;
            }
            if read_record::<Run>(&record).is_err() {
                if let Some(name) = entry.file_name().to_str() {
                    unreadable.push(name.to_string());
                }
            }
        }
        unreadable.sort();
        Ok(unreadable)
    }

    /// Delete a run and all of its loader records.
    pub fn delete_run(&self, run_id: &str) -> Result<()> {
        let dir = self.run_dir(run_id);
        if !dir.exists() {
            return Err(HervatError::RunNotFound(run_id.to_string()));
        }
        fs::remove_dir_all(&dir).map_err(|e| HervatError::io("deleting run directory", e))?;
        debug!(run_id, "Run deleted");
        Ok(())
    }
}

/// Write a record so a concurrent crash never leaves a torn file: serialize
/// to a temp file in the same directory, then atomically rename over the
/// target.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let temp_path = path.with_extension("json.tmp");

    {
        let file =
            File::create(&temp_path).map_err(|e| HervatError::io("creating temp record", e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)
            .map_err(|e| HervatError::Internal(format!("Serializing record: {e}")))?;
        writer
            .flush()
            .map_err(|e| HervatError::io("flushing temp record", e))?;
    }

    fs::rename(&temp_path, path).map_err(|e| HervatError::io("renaming record", e))
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| HervatError::io("opening record", e))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| HervatError::CorruptedState {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LoaderStatus, RunConfig};
    use tempfile::TempDir;

    fn store() -> (TempDir, CheckpointStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_run_roundtrip() {
        let (_tmp, store) = store();
        let mut run = Run::new("roundtrip", RunConfig::default());
        run.register_loader("zaken");
        store.save_run(&run).unwrap();

        let loaded = store.load_run(&run.id).unwrap();
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.loaders, vec!["zaken".to_string()]);
    }

    #[test]
    fn test_missing_run_is_not_found() {
        let (_tmp, store) = store();
        let err = store.load_run("run_nope").unwrap_err();
        assert!(matches!(err, HervatError::RunNotFound(_)));
    }

    #[test]
    fn test_corrupted_run_is_distinct_from_not_found() {
        let (_tmp, store) = store();
        let run = Run::new("corrupt", RunConfig::default());
        store.save_run(&run).unwrap();

        let path = store.run_path(&run.id);
        fs::write(&path, "{ definitely not json").unwrap();

        let err = store.load_run(&run.id).unwrap_err();
        assert!(matches!(err, HervatError::CorruptedState { .. }));
    }

    #[test]
    fn test_loader_roundtrip_and_listing() {
        let (_tmp, store) = store();
        let run = Run::new("loaders", RunConfig::default());
        store.save_run(&run).unwrap();

        assert!(store.load_loader(&run.id, "zaken").unwrap().is_none());

        let mut progress = LoaderProgress::new("zaken");
        progress.mark_processed("z-1");
        progress.mark_failed("z-2", "timeout");
        store.save_loader(&run.id, &progress).unwrap();

        let loaded = store.load_loader(&run.id, "zaken").unwrap().unwrap();
        assert!(loaded.is_processed("z-1"));
        assert_eq!(loaded.failed_ids.get("z-2").unwrap(), "timeout");
        assert_eq!(loaded.status, LoaderStatus::InProgress);

        let all = store.load_loaders(&run.id).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("zaken"));
    }

    #[test]
    fn test_loader_named_run_does_not_clobber_run_record() {
        let (_tmp, store) = store();
        let run = Run::new("collision", RunConfig::default());
        store.save_run(&run).unwrap();

        let mut progress = LoaderProgress::new("run");
        progress.mark_processed("r-1");
        store.save_loader(&run.id, &progress).unwrap();

        // The run record must survive a loader that shares its name.
        let loaded_run = store.load_run(&run.id).unwrap();
        assert_eq!(loaded_run.id, run.id);

        let loaded = store.load_loader(&run.id, "run").unwrap().unwrap();
        assert!(loaded.is_processed("r-1"));
        let all = store.load_loaders(&run.id).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("run"));
    }

    #[test]
    fn test_unreadable_runs_are_listed_separately() {
        let (_tmp, store) = store();
        let mut healthy = Run::new("healthy", RunConfig::default());
        healthy.id = "run_20240101_000000_000".to_string();
        store.save_run(&healthy).unwrap();
        let mut torn = Run::new("torn", RunConfig::default());
        torn.id = "run_20240102_000000_000".to_string();
        store.save_run(&torn).unwrap();
        fs::write(store.run_path(&torn.id), "{ half a record").unwrap();

        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, healthy.id);

        let unreadable = store.list_unreadable_runs().unwrap();
        assert_eq!(unreadable, vec![torn.id.clone()]);
    }

    #[test]
    fn test_list_runs_most_recent_first() {
        let (_tmp, store) = store();
        let mut first = Run::new("first", RunConfig::default());
        first.id = "run_20240101_000000_000".to_string();
        let mut second = Run::new("second", RunConfig::default());
        second.id = "run_20240102_000000_000".to_string();
        second.created_at = first.created_at + chrono::Duration::hours(1);

        store.save_run(&first).unwrap();
        store.save_run(&second).unwrap();

        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert_eq!(runs[1].id, first.id);
    }

    #[test]
    fn test_delete_removes_loader_records() {
        let (_tmp, store) = store();
        let run = Run::new("doomed", RunConfig::default());
        store.save_run(&run).unwrap();
        store
            .save_loader(&run.id, &LoaderProgress::new("zaken"))
            .unwrap();

        store.delete_run(&run.id).unwrap();
        assert!(!store.run_exists(&run.id));
        assert!(store.load_loaders(&run.id).unwrap().is_empty());
    }

    #[test]
    fn test_stale_temp_file_does_not_tear_record() {
        // A crash mid-write leaves only a temp file behind; the previous
        // snapshot must still load.
        let (_tmp, store) = store();
        let mut progress = LoaderProgress::new("zaken");
        progress.mark_processed("z-1");
        let run = Run::new("torn", RunConfig::default());
        store.save_run(&run).unwrap();
        store.save_loader(&run.id, &progress).unwrap();

        let temp = store
            .loader_path(&run.id, "zaken")
            .with_extension("json.tmp");
        fs::write(&temp, "half a reco").unwrap();

        let loaded = store.load_loader(&run.id, "zaken").unwrap().unwrap();
        assert!(loaded.is_processed("z-1"));
        let all = store.load_loaders(&run.id).unwrap();
        assert_eq!(all.len(), 1);
    }
}
