//! judgebench - benchmark code-generation models against an online judge.
//!
//! ## Architecture
//!
//! For each (model, problem) pair a run generates a solution, submits it to
//! the judge, polls for the verdict and folds the outcome into per-model
//! statistics, with many trials in flight at once.
//!
//! - **Task matrix** (`pool::TaskMatrix`): models × problems, cut into
//!   dispatch steps by the parallel strategy (`full`, `models`, `sequential`)
//! - **Executor** (`pool::Executor`): bounded worker pool on a shared or
//!   isolated substrate; every task yields exactly one result
//! - **Solver** (`pipeline::Solver`): analyze → generate → submit → poll,
//!   retrying generation up to the attempt budget
//! - **Submission controller** and **verdict poller**: capped linear backoff
//!   on transient judge failures, and an explicit polling state machine with
//!   a time budget
//! - **Aggregate** (`pipeline::Aggregate`): order-independent fold into
//!   per-model stats
//!
//! Backends sit behind the `client::{Generator, ProblemAnalyzer,
//! JudgeService}` traits; `client::JutgeClient` and `client::ModelAdapter`
//! are the production implementations.

pub mod client;
pub mod models;
pub mod pipeline;
pub mod pool;

// Re-exports for convenience
pub use client::{Generator, JudgeService, JutgeClient, ModelAdapter, ProblemAnalyzer};
pub use models::{
    BenchError, BenchmarkReport, BenchmarkResult, Config, ModelStats, Result, Verdict,
};
pub use pipeline::{Aggregate, Benchmark, Clock, ManualClock, Solver, TokioClock};
pub use pool::{Executor, ServiceProvider, TaskMatrix};
