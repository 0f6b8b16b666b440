//! Per-task solving pipeline: analyze, then generate → submit → poll until
//! accepted or out of attempts.

use crate::client::{Generator, JudgeService, ProblemAnalyzer, SubmissionRequest};
use crate::models::{
    BenchError, BenchmarkResult, BenchmarkTask, Config, StructuredProblem, SubmissionDetails,
    SubmissionId, TrialAttempt, Verdict,
};
use crate::pipeline::{Clock, PollSettings, SubmissionController, VerdictPoller};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backends one task talks to.
#[derive(Clone)]
pub struct TaskServices {
    pub analyzer: Arc<dyn ProblemAnalyzer>,
    pub judge: Arc<dyn JudgeService>,
    pub generator: Arc<dyn Generator>,
}

/// Knobs shared by every task of a run.
#[derive(Debug, Clone)]
pub struct SolveSettings {
    /// Compiler id used for generation and submission
    pub language: String,
    pub submission: SubmissionController,
    pub poll: PollSettings,
}

impl Default for SolveSettings {
    fn default() -> Self {
        Self {
            language: "Python3".to_string(),
            submission: SubmissionController::default(),
            poll: PollSettings::default(),
        }
    }
}

impl SolveSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            language: config.judge.language.clone(),
            submission: SubmissionController::new(config.run.submission_retries),
            poll: PollSettings::from(&config.run),
        }
    }
}

/// Note attached to every submission.
pub fn submission_note(model_name: &str) -> String {
    format!("Benchmark test by {model_name}")
}

/// Running totals over a task's attempts.
#[derive(Debug, Default)]
struct Tally {
    attempts: u32,
    generation: Duration,
    submission: Duration,
    tokens: u64,
    verdict: Option<Verdict>,
    details: Option<SubmissionDetails>,
    error: Option<String>,
    submission_id: Option<SubmissionId>,
    source: Option<String>,
}

impl Tally {
    fn absorb(&mut self, attempt: TrialAttempt) {
        self.attempts = attempt.index;
        self.generation += attempt.generation_latency;
        self.submission += attempt.submission_elapsed;
        self.tokens += attempt.tokens;
        if attempt.source.is_some() {
            self.source = attempt.source;
        }
        if attempt.submission_id.is_some() {
            self.submission_id = attempt.submission_id;
        }
        if attempt.verdict.is_some() {
            self.verdict = attempt.verdict;
            self.details = attempt.details;
            self.error = None;
        }
        if attempt.error.is_some() {
            self.error = attempt.error;
        }
    }

    fn into_result(self, task: &BenchmarkTask, language: &str) -> BenchmarkResult {
        BenchmarkResult {
            task_id: task.id,
            model_name: task.model.name.clone(),
            problem_id: task.problem.clone(),
            verdict: self.verdict.unwrap_or(Verdict::Unknown),
            attempts: self.attempts,
            generation_time_ms: self.generation.as_millis() as u64,
            submission_time_ms: self.submission.as_millis() as u64,
            tokens_used: self.tokens,
            error: self.error,
            submission_id: self.submission_id,
            language: Some(language.to_string()),
            solution_code: self.source,
            submission_details: self.details,
            completed_at: Utc::now(),
        }
    }
}

/// Runs one task end to end. Never fails: every outcome is a result.
pub struct Solver {
    settings: SolveSettings,
    clock: Arc<dyn Clock>,
}

impl Solver {
    pub fn new(settings: SolveSettings, clock: Arc<dyn Clock>) -> Self {
        Self { settings, clock }
    }

    pub async fn solve(&self, task: &BenchmarkTask, services: &TaskServices) -> BenchmarkResult {
        debug!(task = %task.label(), "Analyzing problem");
        let problem = match services.analyzer.analyze(&task.problem).await {
            Ok(p) => p,
            Err(e) => {
                warn!(task = %task.label(), error = %e, "Analysis failed");
                return BenchmarkResult::failed(task, e);
            }
        };

        let poller = VerdictPoller::new(self.settings.poll.clone());
        let mut tally = Tally::default();

        for index in 1..=task.max_attempts {
            let mut attempt = TrialAttempt::new(index);

            let source = match self.generate(task, services, &problem, &mut attempt).await {
                Some(source) => source,
                None => {
                    tally.absorb(attempt);
                    continue;
                }
            };

            let request = SubmissionRequest {
                problem: task.problem.clone(),
                language: self.settings.language.clone(),
                source,
                note: submission_note(&task.model.name),
            };
            attempt.source = Some(request.source.clone());

            let submit_start = self.clock.now();
            let submitted = self
                .settings
                .submission
                .submit(services.judge.as_ref(), self.clock.as_ref(), &request)
                .await;
            attempt.submission_elapsed = self.clock.now().saturating_sub(submit_start);

            let outcome = match submitted {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(task = %task.label(), attempt = index, error = %e, "Submission failed");
                    tally.absorb(attempt);
                    let mut result = tally.into_result(task, &self.settings.language);
                    result.verdict = Verdict::Error;
                    result.error = Some(e.to_string());
                    return result;
                }
            };

            attempt.submission_id = Some(outcome.id.clone());

            let polled = poller
                .poll(
                    services.judge.as_ref(),
                    self.clock.as_ref(),
                    &task.problem,
                    &outcome.id,
                )
                .await;
            attempt.verdict = Some(polled.verdict);
            attempt.details = polled.details;

            info!(
                task = %task.label(),
                attempt = index,
                submission = %outcome.id,
                verdict = %polled.verdict,
                "Attempt judged"
            );

            let accepted = polled.verdict.is_accepted();
            tally.absorb(attempt);
            if accepted {
                break;
            }
        }

        tally.into_result(task, &self.settings.language)
    }

    /// One generation call, bounded by the generator's own budget or, failing
    /// that, the profile's timeout.
    async fn generate(
        &self,
        task: &BenchmarkTask,
        services: &TaskServices,
        problem: &StructuredProblem,
        attempt: &mut TrialAttempt,
    ) -> Option<String> {
        let limit = services
            .generator
            .time_budget()
            .unwrap_or_else(|| task.model.limits.timeout());
        let call = services.generator.generate(problem, &self.settings.language);

        let error = match tokio::time::timeout(limit, call).await {
            Ok(Ok(generation)) => {
                attempt.generation_latency = generation.latency;
                attempt.tokens = generation.tokens;
                return Some(generation.text);
            }
            Ok(Err(e)) => e,
            Err(_) => {
                attempt.generation_latency = limit;
                BenchError::GenerationTimeout(limit)
            }
        };

        warn!(
            task = %task.label(),
            attempt = attempt.index,
            max_attempts = task.max_attempts,
            error = %error,
            "Generation failed"
        );
        attempt.error = Some(error.to_string());
        None
    }
}
