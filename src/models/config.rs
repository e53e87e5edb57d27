//! Configuration models for hervat.
//!
//! All I^R (resolvable ignorance) is parameterized here. Two layers exist:
//! `Config` is what the operator loads from TOML (where checkpoints live,
//! flush cadence, retention), while `RunConfig` is the snapshot persisted
//! with each run and compared on resume.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Top-level configuration for hervat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Checkpoint storage settings
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// Checkpoint storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding run and loader records.
    /// Supports ${ENV_VAR} expansion.
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,

    /// Successfully processed items between periodic flushes
    #[serde(default = "default_interval")]
    pub interval: usize,

    /// Runs retained by `cleanup` when no explicit count is given
    #[serde(default = "default_keep_runs")]
    pub keep_runs: usize,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_interval() -> usize {
    25
}

fn default_keep_runs() -> usize {
    5
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
            interval: default_interval(),
            keep_runs: default_keep_runs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;

        let dir = config.checkpoint.dir.to_string_lossy().to_string();
        config.checkpoint.dir = PathBuf::from(expand_env_vars(&dir));
        Ok(config)
    }
}

/// Per-run configuration snapshot.
///
/// Persisted with the run record and validated against the candidate
/// configuration when the run is resumed. Fatal keys affect which items a
/// loader sees; advisory keys only affect how fast it processes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Lower bound of the ingested date range (fatal)
    pub start_date: String,

    /// Optional upper bound of the date range (fatal)
    #[serde(default)]
    pub end_date: Option<String>,

    /// Items skipped from the front of every loader (fatal)
    #[serde(default)]
    pub skip_count: usize,

    /// Per-loader skip overrides, keyed by loader name (fatal)
    #[serde(default)]
    pub loader_skips: BTreeMap<String, usize>,

    /// Reprocess items that already exist in the sink (fatal)
    #[serde(default)]
    pub overwrite: bool,

    /// Worker pool size per loader (advisory)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Successfully processed items between periodic flushes (advisory)
    #[serde(default = "default_interval")]
    pub checkpoint_interval: usize,
}

fn default_max_workers() -> usize {
    10
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            start_date: String::new(),
            end_date: None,
            skip_count: 0,
            loader_skips: BTreeMap::new(),
            overwrite: false,
            max_workers: default_max_workers(),
            checkpoint_interval: default_interval(),
        }
    }
}

impl RunConfig {
    /// Effective skip count for a loader: its override, or the global count.
    pub fn skip_for(&self, loader_name: &str) -> usize {
        self.loader_skips
            .get(loader_name)
            .copied()
            .unwrap_or(self.skip_count)
    }

    /// One-line human-readable summary for logs and `show` output.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.start_date.is_empty() {
            parts.push(format!("start_date={}", self.start_date));
        }
        if let Some(end) = &self.end_date {
            parts.push(format!("end_date={end}"));
        }
        if self.overwrite {
            parts.push("overwrite=true".to_string());
        }
        parts.push(format!("workers={}", self.max_workers));

        let mut skips = Vec::new();
        if self.skip_count > 0 {
            skips.push(format!("global={}", self.skip_count));
        }
        for (loader, count) in &self.loader_skips {
            skips.push(format!("{loader}={count}"));
        }
        if !skips.is_empty() {
            parts.push(format!("skip=({})", skips.join(", ")));
        }

        if parts.is_empty() {
            "default settings".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// A single divergence between a stored and a candidate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDiff {
    pub key: String,
    pub stored: String,
    pub current: String,
}

impl fmt::Display for ConfigDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: stored={}, current={}",
            self.key, self.stored, self.current
        )
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_for_prefers_override() {
        let mut config = RunConfig {
            skip_count: 100,
            ..Default::default()
        };
        config.loader_skips.insert("zaken".to_string(), 7);

        assert_eq!(config.skip_for("zaken"), 7);
        assert_eq!(config.skip_for("documenten"), 100);
    }

    #[test]
    fn test_run_config_ignores_unknown_fields() {
        // Forward compatibility: a record written by a newer version must
        // still load.
        let json = r#"{
            "start_date": "2024-01-01",
            "overwrite": true,
            "some_future_field": {"nested": 1}
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.start_date, "2024-01-01");
        assert!(config.overwrite);
        assert_eq!(config.max_workers, 10);
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.checkpoint.dir, PathBuf::from("checkpoints"));
        assert_eq!(config.checkpoint.interval, 25);
        assert_eq!(config.checkpoint.keep_runs, 5);
    }

    #[test]
    fn test_summary_lists_skips() {
        let mut config = RunConfig {
            start_date: "2024-01-01".to_string(),
            skip_count: 50,
            ..Default::default()
        };
        config.loader_skips.insert("activiteiten".to_string(), 200);

        let summary = config.summary();
        assert!(summary.contains("start_date=2024-01-01"));
        assert!(summary.contains("global=50"));
        assert!(summary.contains("activiteiten=200"));
    }
}
