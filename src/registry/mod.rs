//! Run lifecycle: creation, discovery, resumption, and cleanup.
//!
//! Provides:
//! - `RunRegistry`: the single entry point an orchestrator constructs and
//!   passes down; no global state
//! - `compat::validate`: the configuration gate for resumed runs

pub mod compat;
mod runs;

pub use compat::{validate as validate_config, CompatReport};
pub use runs::*;
