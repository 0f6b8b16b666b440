//! Core data models for judgebench.
//!
//! - `benchmark`: profiles, tasks, attempts, results and verdicts
//! - `config`: the TOML configuration surface
//! - `error`: error taxonomy
//! - `stats`: aggregated statistics and the report hand-off

mod benchmark;
mod config;
mod error;
mod stats;

pub use benchmark::*;
pub use config::*;
pub use error::*;
pub use stats::*;
