//! Benchmark run: matrix → executor → aggregation → report.

use crate::models::{BenchError, BenchmarkReport, Config, Result, Substrate};
use crate::pipeline::{Aggregate, Clock, SolveSettings, Solver, TokioClock};
use crate::pool::{Executor, IsolatedServices, ServiceProvider, SharedServices, TaskMatrix};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// One configured benchmark.
pub struct Benchmark {
    config: Config,
    clock: Arc<dyn Clock>,
    show_progress: bool,
}

impl Benchmark {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: Arc::new(TokioClock::new()),
            show_progress: false,
        }
    }

    /// Replace the clock driving backoff and polling.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Build the task matrix for a problem set without running anything.
    pub fn plan(&self, problem_set: &str) -> Result<TaskMatrix> {
        let set = self
            .config
            .problem_set(problem_set)
            .ok_or_else(|| BenchError::UnknownProblemSet(problem_set.to_string()))?;
        let models = self.config.enabled_models();
        TaskMatrix::build(
            &models,
            &set,
            self.config.run.strategy,
            self.config.run.max_attempts,
        )
    }

    /// Backends for the configured substrate, talking to the real services.
    pub async fn connect(&self) -> Result<Arc<dyn ServiceProvider>> {
        Ok(match self.config.run.substrate {
            Substrate::Shared => Arc::new(SharedServices::connect(&self.config).await?),
            Substrate::Isolated => Arc::new(IsolatedServices::new(&self.config)?),
        })
    }

    /// Plan, connect to the real services, and run.
    pub async fn run_live(&self, problem_set: &str) -> Result<BenchmarkReport> {
        let matrix = self.plan(problem_set)?;
        let provider = self.connect().await?;
        Ok(self.execute(problem_set, &matrix, provider).await)
    }

    /// Plan and run against the given backends.
    pub async fn run(
        &self,
        problem_set: &str,
        provider: Arc<dyn ServiceProvider>,
    ) -> Result<BenchmarkReport> {
        let matrix = self.plan(problem_set)?;
        Ok(self.execute(problem_set, &matrix, provider).await)
    }

    /// Run a planned matrix. Task failures end up in the report, never here.
    pub async fn execute(
        &self,
        problem_set: &str,
        matrix: &TaskMatrix,
        provider: Arc<dyn ServiceProvider>,
    ) -> BenchmarkReport {
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        info!(
            run_id = %run_id,
            problem_set = problem_set,
            tasks = matrix.len(),
            "Starting benchmark"
        );

        let solver = Solver::new(SolveSettings::from_config(&self.config), Arc::clone(&self.clock));
        let executor = Executor::new(self.config.run.workers(), self.config.run.substrate, solver)
            .with_progress(self.show_progress);
        let results = executor.run(matrix, Arc::clone(&provider)).await;

        let summary = Aggregate::fold(&results).into_summary(start.elapsed());
        for (model, stats) in &summary.model_stats {
            info!(
                model = %model,
                solved = stats.solved,
                total = stats.total,
                errors = stats.errors,
                success_rate = stats.success_rate,
                "Model finished"
            );
        }
        if let Some(throttle) = provider.throttle_stats() {
            info!(
                calls = throttle.total_calls,
                rejections = throttle.total_rejections,
                wait_secs = throttle.total_wait_secs,
                backends = throttle.backends_tracked,
                "Generation throttle"
            );
        }
        info!(
            run_id = %run_id,
            tasks = summary.total_tasks,
            elapsed_ms = summary.benchmark_time_ms,
            "Benchmark complete"
        );

        BenchmarkReport {
            run_id,
            problem_set: problem_set.to_string(),
            strategy: matrix.strategy(),
            results,
            summary,
        }
    }
}
