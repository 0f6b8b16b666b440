//! Bounded-concurrency task executor.
//!
//! Each task runs behind a worker boundary: the solver is spawned as its own
//! task (or, on the isolated substrate, on its own thread with its own
//! runtime) and awaited by a thin wrapper that turns a panic into an `ERROR`
//! result. Results are collected in completion order, and every dispatched
//! task is reconciled against what came back, so each task yields exactly
//! one result.

use crate::models::{BenchError, BenchmarkResult, BenchmarkTask, SubmissionId, Substrate};
use crate::pipeline::Solver;
use crate::pool::{ServiceProvider, TaskMatrix};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Runs a task matrix on a bounded worker pool.
pub struct Executor {
    max_workers: usize,
    substrate: Substrate,
    solver: Arc<Solver>,
    show_progress: bool,
}

impl Executor {
    pub fn new(max_workers: usize, substrate: Substrate, solver: Solver) -> Self {
        Self {
            max_workers: max_workers.max(1),
            substrate,
            solver: Arc::new(solver),
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr while running.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }

    /// Run every step of the matrix, one step after another.
    ///
    /// Returns one result per task, in completion order.
    pub async fn run(
        &self,
        matrix: &TaskMatrix,
        provider: Arc<dyn ServiceProvider>,
    ) -> Vec<BenchmarkResult> {
        info!(
            tasks = matrix.len(),
            steps = matrix.step_count(),
            workers = self.max_workers,
            substrate = %self.substrate,
            "Starting executor"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let pb = self.progress_bar(matrix.len());
        let mut results = Vec::with_capacity(matrix.len());
        let mut submissions: HashMap<SubmissionId, usize> = HashMap::new();

        for step in matrix.steps() {
            let mut outstanding: HashMap<usize, &BenchmarkTask> =
                step.iter().map(|t| (t.id, t)).collect();
            let mut workers = JoinSet::new();

            for task in step {
                workers.spawn(worker(
                    task.clone(),
                    Arc::clone(&semaphore),
                    Arc::clone(&self.solver),
                    Arc::clone(&provider),
                    self.substrate,
                ));
            }

            while let Some(joined) = workers.join_next().await {
                let result = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        error!(error = %e, "Worker wrapper panicked");
                        continue;
                    }
                };
                if outstanding.remove(&result.task_id).is_none() {
                    warn!(task_id = result.task_id, "Dropping result for a task not in this step");
                    continue;
                }

                let result = claim_submission(result, &mut submissions);
                pb.set_message(format!("{}/{} {}", result.model_name, result.problem_id, result.verdict));
                pb.inc(1);
                results.push(result);
            }

            let mut missing: Vec<&BenchmarkTask> = outstanding.into_values().collect();
            missing.sort_by_key(|t| t.id);
            for task in missing {
                error!(task = %task.label(), "Task produced no result");
                pb.inc(1);
                results.push(BenchmarkResult::failed(
                    task,
                    BenchError::WorkerCrashed("worker exited without a result".to_string()),
                ));
            }
        }

        pb.finish_with_message("done");
        results
    }
}

/// Worker boundary: acquire a slot, run the task behind a join handle, and
/// convert a crash into a result.
async fn worker(
    task: BenchmarkTask,
    semaphore: Arc<Semaphore>,
    solver: Arc<Solver>,
    provider: Arc<dyn ServiceProvider>,
    substrate: Substrate,
) -> BenchmarkResult {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return BenchmarkResult::failed(
                &task,
                BenchError::Internal("Semaphore closed".to_string()),
            );
        }
    };
    debug!(task = %task.label(), "Dispatching task");

    let joined = match substrate {
        Substrate::Shared => tokio::spawn(run_task(task.clone(), solver, provider)).await,
        Substrate::Isolated => {
            let isolated = task.clone();
            tokio::task::spawn_blocking(move || run_isolated(isolated, solver, provider)).await
        }
    };

    match joined {
        Ok(result) => result,
        Err(e) => {
            let message = crash_message(e);
            error!(task = %task.label(), error = %message, "Task panicked");
            BenchmarkResult::failed(&task, BenchError::WorkerCrashed(message))
        }
    }
}

async fn run_task(
    task: BenchmarkTask,
    solver: Arc<Solver>,
    provider: Arc<dyn ServiceProvider>,
) -> BenchmarkResult {
    match provider.services_for(&task.model).await {
        Ok(services) => solver.solve(&task, &services).await,
        Err(e) => {
            warn!(task = %task.label(), error = %e, "Could not set up task services");
            BenchmarkResult::failed(&task, e)
        }
    }
}

/// Runs on a dedicated blocking thread with a private runtime.
fn run_isolated(
    task: BenchmarkTask,
    solver: Arc<Solver>,
    provider: Arc<dyn ServiceProvider>,
) -> BenchmarkResult {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build();
    run_on(runtime, task, solver, provider)
}

fn run_on(
    runtime: std::io::Result<Runtime>,
    task: BenchmarkTask,
    solver: Arc<Solver>,
    provider: Arc<dyn ServiceProvider>,
) -> BenchmarkResult {
    match runtime {
        Ok(runtime) => runtime.block_on(run_task(task, solver, provider)),
        Err(e) => {
            error!(task = %task.label(), error = %e, "Could not build worker runtime");
            BenchmarkResult::failed(&task, BenchError::io("building worker runtime", e))
        }
    }
}

fn crash_message(error: JoinError) -> String {
    if error.is_cancelled() {
        return "task was cancelled".to_string();
    }
    let payload = error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Enforce that a submission id belongs to one task only.
fn claim_submission(
    result: BenchmarkResult,
    owners: &mut HashMap<SubmissionId, usize>,
) -> BenchmarkResult {
    let Some(id) = result.submission_id.clone() else {
        return result;
    };
    match owners.get(&id) {
        Some(&owner) if owner != result.task_id => {
            error!(
                submission = %id,
                task_id = result.task_id,
                owner = owner,
                "Submission id reused across tasks"
            );
            let mut failed = BenchmarkResult::failed_with(
                result.task_id,
                &result.model_name,
                &result.problem_id,
                BenchError::DuplicateSubmission {
                    submission_id: id.to_string(),
                },
            );
            failed.attempts = result.attempts;
            failed.generation_time_ms = result.generation_time_ms;
            failed.submission_time_ms = result.submission_time_ms;
            failed.tokens_used = result.tokens_used;
            failed
        }
        _ => {
            owners.insert(id, result.task_id);
            result
        }
    }
}
