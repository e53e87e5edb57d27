//! Concurrent execution over a loader checkpoint.
//!
//! Provides:
//! - `SharedCheckpoint`: a `LoaderCheckpoint` behind a single lock, safe to
//!   mutate from many workers
//! - `with_checkpoint`: the bounded worker-pool runner wrapping an opaque
//!   per-item processing callback

mod runner;
mod shared;

pub use runner::*;
pub use shared::*;
