//! Benchmark data model.
//!
//! Flow: `ModelProfile` × `ProblemSet` → `BenchmarkTask` → (`TrialAttempt`)* →
//! `BenchmarkResult`. Tasks and results are immutable once built; attempts are
//! scratch state owned by the solving pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Kind of generation backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Openai,
    Openrouter,
    /// Any other OpenAI-compatible endpoint; requires `base_url`.
    Compatible,
}

impl ProviderKind {
    /// Base URL used when the profile does not set one.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::Openai => Some("https://api.openai.com/v1"),
            Self::Openrouter => Some("https://openrouter.ai/api/v1"),
            Self::Compatible => None,
        }
    }

    /// Environment variable consulted when the profile names no key source.
    pub fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::Openai => Some("OPENAI_API_KEY"),
            Self::Openrouter => Some("OPENROUTER_API_KEY"),
            Self::Compatible => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Openai => write!(f, "openai"),
            Self::Openrouter => write!(f, "openrouter"),
            Self::Compatible => write!(f, "compatible"),
        }
    }
}

/// Per-call generation limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationLimits {
    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Per-call timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f64 {
    0.1
}

fn default_generation_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl GenerationLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A generation backend under benchmark.
///
/// Loaded once from configuration and shared read-only for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Display name, unique within a run
    pub name: String,

    /// Backend kind
    #[serde(default)]
    pub provider: ProviderKind,

    /// Model identifier understood by the backend
    pub model_id: String,

    /// Override for the backend base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Explicit API key (supports `${VAR}` expansion)
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(flatten)]
    pub limits: GenerationLimits,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ModelProfile {
    /// Minimal profile, mostly useful for tests and programmatic runs.
    pub fn new(name: impl Into<String>, provider: ProviderKind, model_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider,
            model_id: model_id.into(),
            base_url: None,
            api_key: None,
            api_key_env: None,
            limits: GenerationLimits::default(),
            enabled: true,
        }
    }

    /// Resolved base URL, if one is known.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .or_else(|| self.provider.default_base_url())
    }
}

/// Problem identifier in the judging service's namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProblemRef(String);

impl ProblemRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProblemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProblemRef {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Named, ordered set of problems. Duplicates are dropped, first one wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemSet {
    pub name: String,
    problems: Vec<ProblemRef>,
}

impl ProblemSet {
    pub fn new<I, P>(name: impl Into<String>, problems: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProblemRef>,
    {
        let mut unique: Vec<ProblemRef> = Vec::new();
        for problem in problems {
            let problem = problem.into();
            if !unique.contains(&problem) {
                unique.push(problem);
            }
        }
        Self {
            name: name.into(),
            problems: unique,
        }
    }

    pub fn problems(&self) -> &[ProblemRef] {
        &self.problems
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

impl From<String> for ProblemRef {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Submission identifier assigned by the judging service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(String);

impl SubmissionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One (model, problem) trial. Consumed exactly once by a worker.
#[derive(Debug, Clone)]
pub struct BenchmarkTask {
    /// Position in the task matrix, unique within a run
    pub id: usize,
    pub model: Arc<ModelProfile>,
    pub problem: ProblemRef,
    pub max_attempts: u32,
}

impl BenchmarkTask {
    /// `model/problem`, for logs.
    pub fn label(&self) -> String {
        format!("{}/{}", self.model.name, self.problem)
    }
}

/// Sample input/output pair from a problem statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleCase {
    pub input: String,
    pub output: String,
}

/// Problem as handed to a generator after analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredProblem {
    pub id: String,
    pub title: String,
    pub statement: String,
    #[serde(default)]
    pub samples: Vec<SampleCase>,
}

/// Verdict of a judged submission, or a sentinel when none was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "AC")]
    Accepted,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "CE")]
    CompilationError,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "PE")]
    PresentationError,
    #[serde(rename = "OLE")]
    OutputLimitExceeded,
    #[serde(rename = "MLE")]
    MemoryLimitExceeded,
    #[serde(rename = "IE")]
    InternalError,
    #[serde(rename = "QE")]
    QueueError,

    /// Polling budget exhausted before a terminal state
    #[serde(rename = "TIMEOUT")]
    Timeout,
    /// Analysis, submission or worker failure
    #[serde(rename = "ERROR")]
    Error,
    /// No verdict was ever obtained
    #[serde(rename = "UNKNOWN")]
    Unknown,
    /// Submission reached a terminal state without a verdict
    #[serde(rename = "NO_VERDICT")]
    NoVerdict,
}

impl Verdict {
    /// Wire code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Accepted => "AC",
            Self::WrongAnswer => "WA",
            Self::TimeLimitExceeded => "TLE",
            Self::CompilationError => "CE",
            Self::RuntimeError => "RE",
            Self::PresentationError => "PE",
            Self::OutputLimitExceeded => "OLE",
            Self::MemoryLimitExceeded => "MLE",
            Self::InternalError => "IE",
            Self::QueueError => "QE",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
            Self::NoVerdict => "NO_VERDICT",
        }
    }

    /// Parse a code from the judging service's vocabulary.
    ///
    /// Sentinels are never produced by the service, so they do not parse.
    pub fn from_judge_code(code: &str) -> Option<Self> {
        let verdict = match code.trim() {
            "AC" => Self::Accepted,
            "WA" => Self::WrongAnswer,
            "TLE" => Self::TimeLimitExceeded,
            "CE" => Self::CompilationError,
            "RE" => Self::RuntimeError,
            "PE" => Self::PresentationError,
            "OLE" => Self::OutputLimitExceeded,
            "MLE" => Self::MemoryLimitExceeded,
            "IE" => Self::InternalError,
            "QE" => Self::QueueError,
            _ => return None,
        };
        Some(verdict)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Error | Self::Unknown | Self::NoVerdict
        )
    }

    /// Human-readable meaning.
    pub fn meaning(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::CompilationError => "Compilation Error",
            Self::RuntimeError => "Runtime Error",
            Self::PresentationError => "Presentation Error",
            Self::OutputLimitExceeded => "Output Limit Exceeded",
            Self::MemoryLimitExceeded => "Memory Limit Exceeded",
            Self::InternalError => "Internal Error",
            Self::QueueError => "Queue Error",
            Self::Timeout => "Verdict polling timed out",
            Self::Error => "Task failed",
            Self::Unknown => "No verdict obtained",
            Self::NoVerdict => "Judged without a verdict",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Diagnostics the judge reports alongside a verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionDetails {
    /// Compiler messages, mostly useful for CE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler_output: Option<String>,

    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    /// Per-testcase outcomes, kept as the judge sent them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<serde_json::Value>,
}

impl SubmissionDetails {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One generate → submit → poll cycle. Scratch state, never persisted.
#[derive(Debug, Clone, Default)]
pub struct TrialAttempt {
    /// 1-based attempt index
    pub index: u32,
    pub source: Option<String>,
    pub tokens: u64,
    pub generation_latency: Duration,
    pub submission_elapsed: Duration,
    pub submission_id: Option<SubmissionId>,
    pub verdict: Option<Verdict>,
    pub details: Option<SubmissionDetails>,
    pub error: Option<String>,
}

impl TrialAttempt {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }
}

/// Final record of one task. Exactly one per `BenchmarkTask`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Id of the originating task
    pub task_id: usize,

    pub model_name: String,

    pub problem_id: ProblemRef,

    pub verdict: Verdict,

    /// Attempts actually used
    pub attempts: u32,

    /// Generation time summed over all attempts
    pub generation_time_ms: u64,

    /// Submission time (including backoff) summed over all attempts
    pub submission_time_ms: u64,

    /// Tokens summed over all attempts
    pub tokens_used: u64,

    /// Terminal error, if the task failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Last submission made for this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<SubmissionId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Last generated source, kept for debugging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution_code: Option<String>,

    /// Judge diagnostics for the last judged submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_details: Option<SubmissionDetails>,

    pub completed_at: DateTime<Utc>,
}

impl BenchmarkResult {
    /// Result for a task that failed before or outside its attempt loop.
    pub fn failed(task: &BenchmarkTask, error: impl fmt::Display) -> Self {
        Self::failed_with(task.id, &task.model.name, &task.problem, error)
    }

    /// Same as [`BenchmarkResult::failed`] when only the task's identity survives.
    pub fn failed_with(
        task_id: usize,
        model_name: &str,
        problem_id: &ProblemRef,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            task_id,
            model_name: model_name.to_string(),
            problem_id: problem_id.clone(),
            verdict: Verdict::Error,
            attempts: 0,
            generation_time_ms: 0,
            submission_time_ms: 0,
            tokens_used: 0,
            error: Some(error.to_string()),
            submission_id: None,
            language: None,
            solution_code: None,
            submission_details: None,
            completed_at: Utc::now(),
        }
    }

    /// Derived from the verdict; never stored.
    pub fn success(&self) -> bool {
        self.verdict.is_accepted()
    }

    pub fn total_time_ms(&self) -> u64 {
        self.generation_time_ms + self.submission_time_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_codes_round_trip_through_judge_vocabulary() {
        for code in ["AC", "WA", "TLE", "CE", "RE", "PE", "OLE", "MLE", "IE", "QE"] {
            let verdict = Verdict::from_judge_code(code).unwrap();
            assert_eq!(verdict.code(), code);
            assert!(!verdict.is_sentinel());
        }
        assert_eq!(Verdict::from_judge_code("TIMEOUT"), None);
        assert_eq!(Verdict::from_judge_code("XYZ"), None);
    }

    #[test]
    fn test_verdict_serializes_as_code() {
        let json = serde_json::to_string(&Verdict::NoVerdict).unwrap();
        assert_eq!(json, "\"NO_VERDICT\"");
        let parsed: Verdict = serde_json::from_str("\"AC\"").unwrap();
        assert_eq!(parsed, Verdict::Accepted);
    }

    #[test]
    fn test_problem_set_drops_duplicates_in_order() {
        let set = ProblemSet::new("basic", ["P2", "P1", "P2", "P3"]);
        let ids: Vec<&str> = set.problems().iter().map(ProblemRef::as_str).collect();
        assert_eq!(ids, vec!["P2", "P1", "P3"]);
    }

    #[test]
    fn test_failed_result_is_error_and_not_success() {
        let task = BenchmarkTask {
            id: 7,
            model: Arc::new(ModelProfile::new("m", ProviderKind::Openai, "gpt")),
            problem: ProblemRef::new("P1"),
            max_attempts: 2,
        };
        let result = BenchmarkResult::failed(&task, "boom");
        assert_eq!(result.verdict, Verdict::Error);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.task_id, 7);
        assert!(!result.success());
    }

    #[test]
    fn test_profile_base_url_defaults_by_provider() {
        let profile = ModelProfile::new("m", ProviderKind::Openrouter, "x/y");
        assert_eq!(profile.base_url(), Some("https://openrouter.ai/api/v1"));
        let profile = ModelProfile::new("m", ProviderKind::Compatible, "llama");
        assert_eq!(profile.base_url(), None);
    }
}
