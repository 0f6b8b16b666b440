//! End-to-end runs against in-memory backends.

use async_trait::async_trait;
use judgebench::client::{
    Generation, Generator, JudgeService, ProblemAnalyzer, SubmissionRequest, SubmissionStatus,
};
use judgebench::models::{
    BenchError, Config, ModelProfile, ParallelStrategy, ProblemRef, ProviderKind, Result,
    StructuredProblem, SubmissionId, Verdict,
};
use judgebench::pipeline::{Benchmark, ManualClock, TaskServices};
use judgebench::pool::ServiceProvider;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted judge and generator.
#[derive(Default)]
struct FakeBackend {
    /// Problems whose analysis fails, with the error message
    broken_problems: HashMap<String, String>,
    /// Transient failures before each successful submit
    transient_submits: Mutex<u32>,
    /// Verdict reported once a submission is done; `None` keeps it pending
    verdict: Option<&'static str>,
    next_id: AtomicUsize,
    submits: AtomicUsize,
}

#[async_trait]
impl ProblemAnalyzer for FakeBackend {
    async fn analyze(&self, problem: &ProblemRef) -> Result<StructuredProblem> {
        if let Some(message) = self.broken_problems.get(problem.as_str()) {
            return Err(BenchError::Analysis {
                problem_id: problem.to_string(),
                message: message.clone(),
            });
        }
        Ok(StructuredProblem {
            id: problem.to_string(),
            title: "Hello".to_string(),
            statement: "Print hello.".to_string(),
            samples: vec![],
        })
    }
}

#[async_trait]
impl Generator for FakeBackend {
    async fn generate(&self, _: &StructuredProblem, _: &str) -> Result<Generation> {
        Ok(Generation {
            text: "print('hello')".to_string(),
            tokens: 42,
            latency: Duration::from_millis(500),
        })
    }
}

#[async_trait]
impl JudgeService for FakeBackend {
    async fn submit(&self, _: &SubmissionRequest) -> Result<SubmissionId> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        {
            let mut left = self.transient_submits.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(BenchError::submission(
                    "UNREPORTED_ERROR: An error occurred",
                    None,
                ));
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SubmissionId::new(format!("S{id:04}")))
    }

    async fn status(&self, _: &ProblemRef, _: &SubmissionId) -> Result<SubmissionStatus> {
        Ok(match self.verdict {
            Some(code) => SubmissionStatus::done(Some(code)),
            None => SubmissionStatus::pending("pending"),
        })
    }
}

struct FakeProvider(Arc<FakeBackend>);

#[async_trait]
impl ServiceProvider for FakeProvider {
    async fn services_for(&self, _: &Arc<ModelProfile>) -> Result<TaskServices> {
        Ok(TaskServices {
            analyzer: self.0.clone(),
            judge: self.0.clone(),
            generator: self.0.clone(),
        })
    }
}

fn config(models: &[&str], problems: &[&str], workers: usize) -> Config {
    let mut config = Config::default();
    for name in models {
        let mut model = ModelProfile::new(*name, ProviderKind::Compatible, *name);
        model.base_url = Some("http://localhost:8000/v1".to_string());
        config.models.push(model);
    }
    config.problem_sets.insert(
        "set".to_string(),
        problems.iter().map(|p| p.to_string()).collect(),
    );
    config.run.max_workers = Some(workers);
    config
}

fn benchmark(config: Config) -> Benchmark {
    Benchmark::new(config).with_clock(Arc::new(ManualClock::new()))
}

#[tokio::test]
async fn accepted_on_first_try() {
    let backend = Arc::new(FakeBackend {
        verdict: Some("AC"),
        ..Default::default()
    });

    let report = benchmark(config(&["m"], &["P1"], 1))
        .run("set", Arc::new(FakeProvider(backend)))
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.attempts, 1);
    assert_eq!(result.verdict, Verdict::Accepted);
    assert!(result.success());
    assert_eq!(report.summary.model_stats["m"].success_rate, 100.0);
}

#[tokio::test]
async fn transient_submission_failures_are_retried() {
    let backend = Arc::new(FakeBackend {
        verdict: Some("AC"),
        transient_submits: Mutex::new(2),
        ..Default::default()
    });

    let report = benchmark(config(&["m"], &["P1"], 1))
        .run("set", Arc::new(FakeProvider(backend.clone())))
        .await
        .unwrap();

    let result = &report.results[0];
    assert_eq!(result.verdict, Verdict::Accepted);
    assert!(result.success());
    assert_eq!(backend.submits.load(Ordering::SeqCst), 3);
    // Backoff of 5s then 10s.
    assert!(result.submission_time_ms >= 15_000);
    assert!(result.submission_time_ms < 16_000);
}

#[tokio::test]
async fn verdict_never_arrives() {
    let backend = Arc::new(FakeBackend::default());

    let report = benchmark(config(&["m"], &["P1"], 1))
        .run("set", Arc::new(FakeProvider(backend)))
        .await
        .unwrap();

    let result = &report.results[0];
    assert_eq!(result.verdict, Verdict::Timeout);
    assert!(!result.success());
    assert!(result.error.is_none());
}

#[tokio::test]
async fn full_matrix_groups_by_model() {
    let backend = Arc::new(FakeBackend {
        verdict: Some("WA"),
        ..Default::default()
    });
    let mut config = config(&["a", "b", "c"], &["P1", "P2"], 2);
    config.run.strategy = ParallelStrategy::Full;

    let report = benchmark(config)
        .run("set", Arc::new(FakeProvider(backend)))
        .await
        .unwrap();

    assert_eq!(report.results.len(), 6);
    assert_eq!(report.summary.model_stats.len(), 3);
    for stats in report.summary.model_stats.values() {
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.success_rate, 0.0);
    }

    let mut ids: Vec<&str> = report
        .results
        .iter()
        .filter_map(|r| r.submission_id.as_ref().map(SubmissionId::as_str))
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6);
}

#[tokio::test]
async fn analysis_failure_is_isolated_to_its_task() {
    let mut broken = HashMap::new();
    broken.insert("P2".to_string(), "statement not found".to_string());
    let backend = Arc::new(FakeBackend {
        verdict: Some("AC"),
        broken_problems: broken,
        ..Default::default()
    });

    let report = benchmark(config(&["a", "b"], &["P1", "P2", "P3"], 3))
        .run("set", Arc::new(FakeProvider(backend)))
        .await
        .unwrap();

    assert_eq!(report.results.len(), 6);
    for result in &report.results {
        if result.problem_id.as_str() == "P2" {
            assert_eq!(result.verdict, Verdict::Error);
            assert_eq!(
                result.error.as_deref(),
                Some("Failed to analyze problem P2: statement not found")
            );
            assert!(!result.success());
        } else {
            assert_eq!(result.verdict, Verdict::Accepted);
        }
    }
    assert_eq!(report.summary.model_stats["a"].errors, 1);
    assert_eq!(report.summary.model_stats["a"].solved, 2);
}

#[tokio::test]
async fn report_serializes_with_derived_success() {
    let backend = Arc::new(FakeBackend {
        verdict: Some("AC"),
        ..Default::default()
    });

    let report = benchmark(config(&["m"], &["P1"], 1))
        .run("set", Arc::new(FakeProvider(backend)))
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("report.json");
    report.write_json(&path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["results"][0]["success"], true);
    assert_eq!(json["results"][0]["verdict"], "AC");
    assert_eq!(json["summary"]["model_stats"]["m"]["solved"], 1);
    // The fake judge sends no diagnostics, so the field is left out.
    assert!(json["results"][0].get("submission_details").is_none());
}
