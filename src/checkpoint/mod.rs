//! Checkpoint module for resumable run execution.
//!
//! Provides:
//! - `CheckpointStore`: atomic persistence of run and loader records
//! - `LoaderCheckpoint`: per-loader progress ledger with periodic flushing

mod progress;
mod store;

pub use progress::*;
pub use store::*;
