//! Error types for hervat.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (run not found, nothing to resume)
//! - I^B materialized: Infrastructure failures (disk, torn records)
//! - K_i violated: Internal invariant violations (bugs)

use super::{ConfigDiff, RunStatus};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for hervat.
#[derive(Debug, Error)]
pub enum HervatError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Nothing to resume: {0}")]
    NothingToResume(String),

    #[error("Configuration mismatch, refusing to resume:\n{}", format_diffs(.diffs))]
    ConfigMismatch { diffs: Vec<ConfigDiff> },

    #[error("Invalid status transition for run {run_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Run {run_id} has unfinished loaders: {}", .pending.join(", "))]
    LoadersPending {
        run_id: String,
        pending: Vec<String>,
    },

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED — Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════

    #[error("Corrupted checkpoint record at {path:?}: {reason}")]
    CorruptedState { path: PathBuf, reason: String },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Loader '{loader}' failed: {reason}")]
    LoaderFailed { loader: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_diffs(diffs: &[ConfigDiff]) -> String {
    diffs
        .iter()
        .map(|d| format!("  - {d}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl HervatError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error aborts a whole loader rather than a single item.
    ///
    /// Item callbacks returning a fatal error flip the cancellation flag;
    /// anything else is recorded against the item and processing continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LoaderFailed { .. }
                | Self::CorruptedState { .. }
                | Self::ConfigMismatch { .. }
                | Self::Internal(_)
        )
    }

    /// Process exit code for orchestrators built on this engine.
    ///
    /// A configuration-mismatch refusal is user-actionable and distinguished
    /// from fatal loader/infrastructure failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigMismatch { .. } => 2,
            Self::CorruptedState { .. } => 3,
            _ => 1,
        }
    }
}

/// Result type alias for hervat.
pub type Result<T> = std::result::Result<T, HervatError>;
