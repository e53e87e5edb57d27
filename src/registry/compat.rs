//! Configuration compatibility gate for resumed runs.
//!
//! Epistemic foundation:
//! - K_i: Fatal keys change which items a loader sees; resuming across them
//!   would merge two incompatible item universes under one run
//! - B_i: Advisory keys only affect pacing → mismatch is logged, not refused

use crate::models::{ConfigDiff, RunConfig};
use std::fmt::Display;
use tracing::warn;

/// Outcome of comparing a stored run configuration against a candidate.
#[derive(Debug, Clone, Default)]
pub struct CompatReport {
    /// Divergences that refuse resumption
    pub fatal: Vec<ConfigDiff>,
    /// Divergences that are allowed but worth knowing about
    pub warnings: Vec<ConfigDiff>,
}

impl CompatReport {
    /// Whether the candidate may resume the stored run.
    pub fn is_compatible(&self) -> bool {
        self.fatal.is_empty()
    }
}

/// Compare a run's persisted configuration snapshot against the candidate
/// configuration of the current invocation.
///
/// Fatal keys: date range, skip counts, overwrite flag.
/// Advisory keys: worker count, checkpoint interval.
pub fn validate(stored: &RunConfig, candidate: &RunConfig) -> CompatReport {
    let mut report = CompatReport::default();

    diff_into(
        &mut report.fatal,
        "start_date",
        &stored.start_date,
        &candidate.start_date,
    );
    diff_into(
        &mut report.fatal,
        "end_date",
        &display_opt(&stored.end_date),
        &display_opt(&candidate.end_date),
    );
    diff_into(
        &mut report.fatal,
        "skip_count",
        &stored.skip_count,
        &candidate.skip_count,
    );
    diff_into(
        &mut report.fatal,
        "overwrite",
        &stored.overwrite,
        &candidate.overwrite,
    );

    // Per-loader skips: compare over the union of loader names so a skip
    // added or removed on either side shows up.
    let mut skip_loaders: Vec<&String> = stored
        .loader_skips
        .keys()
        .chain(candidate.loader_skips.keys())
        .collect();
    skip_loaders.sort();
    skip_loaders.dedup();
    for loader in skip_loaders {
        diff_into(
            &mut report.fatal,
            &format!("skip.{loader}"),
            &display_opt(&stored.loader_skips.get(loader)),
            &display_opt(&candidate.loader_skips.get(loader)),
        );
    }

    diff_into(
        &mut report.warnings,
        "max_workers",
        &stored.max_workers,
        &candidate.max_workers,
    );
    diff_into(
        &mut report.warnings,
        "checkpoint_interval",
        &stored.checkpoint_interval,
        &candidate.checkpoint_interval,
    );

    for diff in &report.warnings {
        warn!(key = %diff.key, stored = %diff.stored, current = %diff.current,
            "Advisory configuration changed since the run was created");
    }

    report
}

fn diff_into<T: Display + PartialEq>(diffs: &mut Vec<ConfigDiff>, key: &str, stored: &T, current: &T) {
    if stored != current {
        diffs.push(ConfigDiff {
            key: key.to_string(),
            stored: stored.to_string(),
            current: current.to_string(),
        });
    }
}

fn display_opt<T: Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "unset".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> RunConfig {
        RunConfig {
            start_date: "2024-01-01".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_configs_are_compatible() {
        let config = base_config();
        let report = validate(&config, &config.clone());
        assert!(report.is_compatible());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_fatal_keys_are_named_exactly() {
        let stored = base_config();
        let mut candidate = base_config();
        candidate.start_date = "2024-06-01".to_string();
        candidate.overwrite = true;
        candidate.loader_skips.insert("zaken".to_string(), 500);

        let report = validate(&stored, &candidate);
        assert!(!report.is_compatible());

        let keys: Vec<&str> = report.fatal.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["start_date", "overwrite", "skip.zaken"]);

        let start = &report.fatal[0];
        assert_eq!(start.stored, "2024-01-01");
        assert_eq!(start.current, "2024-06-01");
    }

    #[test]
    fn test_advisory_keys_only_warn() {
        let stored = base_config();
        let mut candidate = base_config();
        candidate.max_workers = 20;
        candidate.checkpoint_interval = 100;

        let report = validate(&stored, &candidate);
        assert!(report.is_compatible());
        let keys: Vec<&str> = report.warnings.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["max_workers", "checkpoint_interval"]);
    }

    #[test]
    fn test_removed_loader_skip_is_fatal() {
        let mut stored = base_config();
        stored.loader_skips.insert("documenten".to_string(), 10);
        let candidate = base_config();

        let report = validate(&stored, &candidate);
        assert_eq!(report.fatal.len(), 1);
        assert_eq!(report.fatal[0].key, "skip.documenten");
        assert_eq!(report.fatal[0].stored, "10");
        assert_eq!(report.fatal[0].current, "unset");
    }
}
