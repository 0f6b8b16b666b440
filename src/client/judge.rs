//! Judging service boundaries.
//!
//! The core only talks to the judge through these traits, so every
//! component above them can be exercised with in-memory fakes.

use crate::models::{ProblemRef, Result, StructuredProblem, SubmissionDetails, SubmissionId};
use async_trait::async_trait;

/// Fetches and structures a problem statement.
#[async_trait]
pub trait ProblemAnalyzer: Send + Sync {
    /// Any error here is fatal for the task.
    async fn analyze(&self, problem: &ProblemRef) -> Result<StructuredProblem>;
}

/// A solution ready to be judged.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub problem: ProblemRef,
    /// Compiler id
    pub language: String,
    pub source: String,
    /// Free-text note attached to the submission
    pub note: String,
}

/// Processing state reported by the judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    /// Still queued or running; carries the raw state name
    Pending(String),
    /// Terminal
    Done,
}

/// Snapshot of a submission's status.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionStatus {
    pub state: SubmissionState,
    /// Raw verdict code, only meaningful once done
    pub verdict: Option<String>,
    pub details: Option<SubmissionDetails>,
}

impl SubmissionStatus {
    pub fn pending(state: impl Into<String>) -> Self {
        Self {
            state: SubmissionState::Pending(state.into()),
            verdict: None,
            details: None,
        }
    }

    pub fn done(verdict: Option<&str>) -> Self {
        Self {
            state: SubmissionState::Done,
            verdict: verdict.map(str::to_string),
            details: None,
        }
    }

    /// Attach judge diagnostics; empty details are dropped.
    pub fn with_details(mut self, details: SubmissionDetails) -> Self {
        self.details = (!details.is_empty()).then_some(details);
        self
    }

    pub fn is_done(&self) -> bool {
        self.state == SubmissionState::Done
    }
}

/// Submission and status endpoints of the judging service.
#[async_trait]
pub trait JudgeService: Send + Sync {
    /// Submit a solution.
    ///
    /// Failures must be `BenchError::Submission` carrying a transient or
    /// fatal kind.
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionId>;

    /// Query a submission's status.
    async fn status(&self, problem: &ProblemRef, submission: &SubmissionId)
        -> Result<SubmissionStatus>;
}
