//! Results aggregation.
//!
//! Folding is order independent: counters are integers and every derived
//! rate is recomputed from them, so any permutation of the same results (or
//! any split into partial folds that are later merged) gives the same value.

use crate::models::{BenchmarkResult, ModelStats, ProblemRef, RunSummary};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    models: BTreeMap<String, ModelStats>,
    problems: BTreeSet<ProblemRef>,
    tasks: usize,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a BenchmarkResult>,
    {
        let mut aggregate = Self::new();
        for result in results {
            aggregate.record(result);
        }
        aggregate
    }

    pub fn record(&mut self, result: &BenchmarkResult) {
        self.tasks += 1;
        self.problems.insert(result.problem_id.clone());
        self.models
            .entry(result.model_name.clone())
            .or_default()
            .record(result);
    }

    pub fn merge(&mut self, other: &Aggregate) {
        self.tasks += other.tasks;
        self.problems.extend(other.problems.iter().cloned());
        for (name, stats) in &other.models {
            self.models.entry(name.clone()).or_default().merge(stats);
        }
    }

    pub fn model(&self, name: &str) -> Option<&ModelStats> {
        self.models.get(name)
    }

    pub fn models(&self) -> &BTreeMap<String, ModelStats> {
        &self.models
    }

    pub fn tasks(&self) -> usize {
        self.tasks
    }

    pub fn into_summary(self, benchmark_time: Duration) -> RunSummary {
        RunSummary {
            benchmark_time_ms: benchmark_time.as_millis() as u64,
            total_tasks: self.tasks,
            total_problems: self.problems.len(),
            total_models: self.models.len(),
            model_stats: self.models,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Verdict;

    fn result(model: &str, problem: &str, verdict: Verdict, error: Option<&str>) -> BenchmarkResult {
        BenchmarkResult {
            task_id: 0,
            model_name: model.to_string(),
            problem_id: ProblemRef::new(problem),
            verdict,
            attempts: 1,
            generation_time_ms: 120,
            submission_time_ms: 30,
            tokens_used: 7,
            error: error.map(str::to_string),
            submission_id: None,
            language: None,
            solution_code: None,
            submission_details: None,
            completed_at: Utc::now(),
        }
    }

    fn sample() -> Vec<BenchmarkResult> {
        vec![
            result("a", "P1", Verdict::Accepted, None),
            result("a", "P2", Verdict::WrongAnswer, None),
            result("a", "P3", Verdict::Error, Some("analysis failed")),
            result("b", "P1", Verdict::Accepted, None),
            result("b", "P2", Verdict::Timeout, None),
            result("b", "P3", Verdict::NoVerdict, None),
            result("c", "P1", Verdict::Accepted, None),
        ]
    }

    #[test]
    fn test_fold_groups_by_model() {
        let aggregate = Aggregate::fold(&sample());
        assert_eq!(aggregate.tasks(), 7);
        assert_eq!(aggregate.models().len(), 3);

        let a = aggregate.model("a").unwrap();
        assert_eq!((a.total, a.solved, a.failed, a.errors), (3, 1, 1, 1));
        assert!((a.success_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(a.avg_time_per_task_ms, 150.0);

        let b = aggregate.model("b").unwrap();
        assert_eq!((b.solved, b.failed, b.errors), (1, 2, 0));
        assert_eq!(b.verdicts[&Verdict::NoVerdict], 1);

        let summary = aggregate.into_summary(Duration::from_secs(3));
        assert_eq!(summary.total_problems, 3);
        assert_eq!(summary.total_models, 3);
        assert_eq!(summary.benchmark_time_ms, 3000);
    }

    #[test]
    fn test_fold_is_order_independent() {
        let results = sample();
        let expected = Aggregate::fold(&results);

        let mut reversed = results.clone();
        reversed.reverse();
        assert_eq!(Aggregate::fold(&reversed), expected);

        for shift in 1..results.len() {
            let mut rotated = results.clone();
            rotated.rotate_left(shift);
            assert_eq!(Aggregate::fold(&rotated), expected);
        }

        let mut interleaved: Vec<_> = results.iter().step_by(2).cloned().collect();
        interleaved.extend(results.iter().skip(1).step_by(2).cloned());
        assert_eq!(Aggregate::fold(&interleaved), expected);
    }

    #[test]
    fn test_merge_matches_single_fold() {
        let results = sample();
        let (left, right) = results.split_at(3);
        let mut merged = Aggregate::fold(right);
        merged.merge(&Aggregate::fold(left));
        assert_eq!(merged, Aggregate::fold(&results));
    }

    #[test]
    fn test_empty_aggregate() {
        let summary = Aggregate::new().into_summary(Duration::ZERO);
        assert_eq!(summary.total_tasks, 0);
        assert!(summary.model_stats.is_empty());
    }
}
