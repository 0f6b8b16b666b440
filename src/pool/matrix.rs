//! Task matrix: models × problems, cut into dispatch steps by strategy.

use crate::models::{
    BenchError, BenchmarkTask, ModelProfile, ParallelStrategy, ProblemSet, Result,
};
use std::ops::Range;
use std::sync::Arc;
use tracing::info;

/// Every task of a run plus the order in which groups of them are released.
///
/// Tasks within a step run concurrently; steps run one after another.
#[derive(Debug, Clone)]
pub struct TaskMatrix {
    tasks: Vec<BenchmarkTask>,
    steps: Vec<Range<usize>>,
    strategy: ParallelStrategy,
}

impl TaskMatrix {
    /// Build the matrix. Fails before anything runs on an empty problem
    /// set, no enabled model, or a zero attempt budget.
    pub fn build(
        models: &[ModelProfile],
        problems: &ProblemSet,
        strategy: ParallelStrategy,
        max_attempts: u32,
    ) -> Result<Self> {
        if problems.is_empty() {
            return Err(BenchError::EmptyProblemSet(problems.name.clone()));
        }
        let enabled: Vec<Arc<ModelProfile>> = models
            .iter()
            .filter(|m| m.enabled)
            .cloned()
            .map(Arc::new)
            .collect();
        if enabled.is_empty() {
            return Err(BenchError::NoEnabledModels);
        }
        if max_attempts == 0 {
            return Err(BenchError::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let mut tasks = Vec::with_capacity(enabled.len() * problems.len());
        for model in &enabled {
            for problem in problems.problems() {
                tasks.push(BenchmarkTask {
                    id: tasks.len(),
                    model: Arc::clone(model),
                    problem: problem.clone(),
                    max_attempts,
                });
            }
        }

        let per_model = problems.len();
        let steps = match strategy {
            ParallelStrategy::Full => vec![0..tasks.len()],
            ParallelStrategy::Models => (0..enabled.len())
                .map(|m| m * per_model..(m + 1) * per_model)
                .collect(),
            ParallelStrategy::Sequential => (0..tasks.len()).map(|i| i..i + 1).collect(),
        };

        info!(
            models = enabled.len(),
            problems = per_model,
            tasks = tasks.len(),
            steps = steps.len(),
            strategy = %strategy,
            "Built task matrix"
        );

        Ok(Self {
            tasks,
            steps,
            strategy,
        })
    }

    pub fn tasks(&self) -> &[BenchmarkTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn strategy(&self) -> ParallelStrategy {
        self.strategy
    }

    /// Dispatch steps, in order.
    pub fn steps(&self) -> impl Iterator<Item = &[BenchmarkTask]> {
        self.steps.iter().map(|r| &self.tasks[r.clone()])
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderKind;

    fn models(names: &[&str]) -> Vec<ModelProfile> {
        names
            .iter()
            .map(|n| ModelProfile::new(*n, ProviderKind::Openai, *n))
            .collect()
    }

    fn set() -> ProblemSet {
        ProblemSet::new("basic", ["P1", "P2"])
    }

    #[test]
    fn test_full_is_one_step_cross_product() {
        let matrix =
            TaskMatrix::build(&models(&["a", "b", "c"]), &set(), ParallelStrategy::Full, 1)
                .unwrap();
        assert_eq!(matrix.len(), 6);
        assert_eq!(matrix.step_count(), 1);
        let ids: Vec<usize> = matrix.tasks().iter().map(|t| t.id).collect();
        assert_eq!(ids, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn test_models_strategy_groups_by_model() {
        let matrix =
            TaskMatrix::build(&models(&["a", "b"]), &set(), ParallelStrategy::Models, 2).unwrap();
        let steps: Vec<Vec<String>> = matrix
            .steps()
            .map(|s| s.iter().map(|t| t.label()).collect())
            .collect();
        assert_eq!(steps, vec![vec!["a/P1", "a/P2"], vec!["b/P1", "b/P2"]]);
        assert!(matrix.tasks().iter().all(|t| t.max_attempts == 2));
    }

    #[test]
    fn test_sequential_is_one_task_per_step() {
        let matrix =
            TaskMatrix::build(&models(&["a", "b"]), &set(), ParallelStrategy::Sequential, 1)
                .unwrap();
        assert_eq!(matrix.step_count(), 4);
        assert!(matrix.steps().all(|s| s.len() == 1));
    }

    #[test]
    fn test_fails_fast_on_bad_input() {
        let empty = ProblemSet::new("none", Vec::<String>::new());
        assert!(matches!(
            TaskMatrix::build(&models(&["a"]), &empty, ParallelStrategy::Full, 1),
            Err(BenchError::EmptyProblemSet(_))
        ));

        let mut disabled = models(&["a"]);
        disabled[0].enabled = false;
        assert!(matches!(
            TaskMatrix::build(&disabled, &set(), ParallelStrategy::Full, 1),
            Err(BenchError::NoEnabledModels)
        ));

        assert!(TaskMatrix::build(&models(&["a"]), &set(), ParallelStrategy::Full, 0).is_err());
    }
}
