//! Core data models for hervat.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees
//! - B_i (Beliefs): Wrapped in Result/Option
//! - I^R (Resolvable): Config parameters with serde defaults
//! - I^B (Bounded): Error variants with recovery strategies

mod config;
mod error;
mod run;

pub use config::*;
pub use error::*;
pub use run::*;
