//! Aggregated statistics and the report handed to renderers.

use super::{BenchmarkResult, BenchError, ParallelStrategy, Result, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Per-model counters.
///
/// Only integer counters are folded; derived rates are recomputed from them
/// after every update so any fold order produces identical values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    /// Tasks folded in
    pub total: usize,

    /// Accepted
    pub solved: usize,

    /// Judged but not accepted, no terminal error
    pub failed: usize,

    /// Terminal error present
    pub errors: usize,

    /// Generation + submission time over all tasks
    pub total_time_ms: u64,

    pub total_tokens: u64,

    /// Count of each final verdict
    pub verdicts: BTreeMap<Verdict, usize>,

    /// `solved / total * 100`, 0 when empty
    pub success_rate: f64,

    /// `total_time_ms / total`, 0 when empty
    pub avg_time_per_task_ms: f64,
}

impl ModelStats {
    /// Fold one result in.
    pub fn record(&mut self, result: &BenchmarkResult) {
        self.total += 1;
        self.total_time_ms += result.total_time_ms();
        self.total_tokens += result.tokens_used;

        if result.success() {
            self.solved += 1;
        } else if result.error.is_some() {
            self.errors += 1;
        } else {
            self.failed += 1;
        }

        *self.verdicts.entry(result.verdict).or_insert(0) += 1;
        self.finalize();
    }

    /// Combine two partial folds.
    pub fn merge(&mut self, other: &ModelStats) {
        self.total += other.total;
        self.solved += other.solved;
        self.failed += other.failed;
        self.errors += other.errors;
        self.total_time_ms += other.total_time_ms;
        self.total_tokens += other.total_tokens;
        for (verdict, count) in &other.verdicts {
            *self.verdicts.entry(*verdict).or_insert(0) += count;
        }
        self.finalize();
    }

    /// Recompute derived rates.
    fn finalize(&mut self) {
        if self.total > 0 {
            self.success_rate = self.solved as f64 / self.total as f64 * 100.0;
            self.avg_time_per_task_ms = self.total_time_ms as f64 / self.total as f64;
        } else {
            self.success_rate = 0.0;
            self.avg_time_per_task_ms = 0.0;
        }
    }
}

/// Run-level summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Wall-clock duration of the run
    pub benchmark_time_ms: u64,

    pub total_tasks: usize,

    /// Distinct problems seen
    pub total_problems: usize,

    pub total_models: usize,

    pub model_stats: BTreeMap<String, ModelStats>,

    pub generated_at: DateTime<Utc>,
}

/// A result as rendered, with `success` derived at serialization time.
#[derive(Debug, Serialize)]
pub struct ReportedResult<'a> {
    #[serde(flatten)]
    pub result: &'a BenchmarkResult,
    pub success: bool,
}

impl<'a> From<&'a BenchmarkResult> for ReportedResult<'a> {
    fn from(result: &'a BenchmarkResult) -> Self {
        Self {
            result,
            success: result.success(),
        }
    }
}

/// Everything a run produces, handed to renderers in one piece.
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub run_id: Uuid,
    pub problem_set: String,
    pub strategy: ParallelStrategy,
    /// Completion order
    pub results: Vec<BenchmarkResult>,
    pub summary: RunSummary,
}

#[derive(Serialize)]
struct ReportView<'a> {
    run_id: &'a Uuid,
    problem_set: &'a str,
    strategy: ParallelStrategy,
    results: Vec<ReportedResult<'a>>,
    summary: &'a RunSummary,
}

impl BenchmarkReport {
    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        let view = ReportView {
            run_id: &self.run_id,
            problem_set: &self.problem_set,
            strategy: self.strategy,
            results: self.results.iter().map(ReportedResult::from).collect(),
            summary: &self.summary,
        };
        serde_json::to_string_pretty(&view)
            .map_err(|e| BenchError::Internal(format!("Serializing report: {e}")))
    }

    /// Write the report as JSON.
    pub fn write_json(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| BenchError::io("creating report directory", e))?;
        }
        std::fs::write(path, self.to_json()?).map_err(|e| BenchError::io("writing report", e))
    }
}
