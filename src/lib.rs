//! hervat - Checkpointed, resumable execution for long-running ingest runs.
//!
//! ## Architecture
//!
//! hervat tracks progress for multi-hour ingest jobs so an interrupted run can
//! be resumed without redoing finished work:
//! - **CheckpointStore**: atomic, human-inspectable JSON snapshots on disk
//! - **LoaderCheckpoint**: per-loader ledger of processed/failed item keys
//! - **SharedCheckpoint**: the same ledger behind a lock, for concurrent workers
//! - **RunRegistry**: run lifecycle (new, resume, list, cleanup) and the
//!   `with_checkpoint` worker-pool runner
//!
//! What is actually loaded stays opaque: items flow through a caller-supplied
//! async callback, and the engine only tracks membership and persists state.
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Crash/disk uncertainties (atomic writes, retried flushes)

pub mod checkpoint;
pub mod models;
pub mod pool;
pub mod registry;

// Re-exports for convenience
pub use checkpoint::{CheckpointStore, LoaderCheckpoint};
pub use models::{
    Config, HervatError, LoaderProgress, LoaderStatus, ProgressStats, Result, Run, RunConfig,
    RunStatus, RunSummary,
};
pub use pool::{with_checkpoint, LoaderOutcome, SharedCheckpoint};
pub use registry::{validate_config, CompatReport, RunRegistry};
