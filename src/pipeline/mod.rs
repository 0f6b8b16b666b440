//! Solving pipeline and run orchestration.
//!
//! - `clock`: injectable time source
//! - `submission`: submission retry/backoff
//! - `verdict`: verdict polling state machine
//! - `solver`: per-task analyze → generate → submit → poll loop
//! - `aggregate`: order-independent result folding
//! - `benchmark`: end-to-end run

mod aggregate;
mod benchmark;
mod clock;
mod solver;
mod submission;
mod verdict;

pub use aggregate::*;
pub use benchmark::*;
pub use clock::*;
pub use solver::*;
pub use submission::*;
pub use verdict::*;
