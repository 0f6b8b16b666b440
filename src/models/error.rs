//! Error types for judgebench.
//!
//! Taxonomy:
//! - Setup failures: configuration, empty problem sets, no enabled models.
//!   These abort a run before any task is dispatched.
//! - Task failures: analysis, generation, submission. These never escape a
//!   worker; they are folded into a `BenchmarkResult`.
//! - Transport failures: network, protocol, timeouts. Classified as
//!   retryable or not by the HTTP clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for judgebench.
#[derive(Debug, Error)]
pub enum BenchError {
    // ═══════════════════════════════════════════════════════════════════
    // SETUP - the run cannot start
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Problem set not found: {0}")]
    UnknownProblemSet(String),

    #[error("Problem set '{0}' is empty")]
    EmptyProblemSet(String),

    #[error("No enabled models found")]
    NoEnabledModels,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ═══════════════════════════════════════════════════════════════════
    // TASK - recorded on the task's result, never propagated
    // ═══════════════════════════════════════════════════════════════════
    #[error("Failed to analyze problem {problem_id}: {message}")]
    Analysis { problem_id: String, message: String },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    #[error("Submission failed ({kind}): {message}")]
    Submission {
        kind: SubmissionErrorKind,
        message: String,
    },

    #[error("Submission failed after {attempts} attempts: {last_error}")]
    SubmissionRetriesExhausted { attempts: u32, last_error: String },

    #[error("Status query failed: {0}")]
    Query(String),

    #[error("Submission id {submission_id} already belongs to another task")]
    DuplicateSubmission { submission_id: String },

    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    // ═══════════════════════════════════════════════════════════════════
    // TRANSPORT - backends misbehaving
    // ═══════════════════════════════════════════════════════════════════
    #[error("Provider API error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Judge API error: {0}")]
    Judge(#[from] JutgeError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("Service overloaded (HTTP {status})")]
    Overloaded { status: u16 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Generation backend errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

/// Error object returned by the judging service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JutgeError {
    #[serde(default = "default_error_name")]
    pub name: String,
    #[serde(default = "default_error_message")]
    pub message: String,
    #[serde(default)]
    pub operation_id: Option<String>,
}

impl fmt::Display for JutgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)?;
        if let Some(id) = &self.operation_id {
            write!(f, " (operation: {id})")?;
        }
        Ok(())
    }
}

impl std::error::Error for JutgeError {}

fn default_error_name() -> String {
    "UnknownError".to_string()
}

fn default_error_message() -> String {
    "Unknown error".to_string()
}

/// How a submission failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionErrorKind {
    /// Rate limiting or overload; worth retrying after a delay.
    Transient,
    /// Anything else; retrying will not help.
    Fatal,
}

impl SubmissionErrorKind {
    /// Signatures the judging service uses when it sheds load.
    const TRANSIENT_SIGNATURES: [&'static str; 3] =
        ["UNREPORTED_ERROR", "An error occurred", "Too Many Requests"];

    /// Classify a failure by its message and, when known, HTTP status.
    pub fn classify(message: &str, status: Option<u16>) -> Self {
        if matches!(status, Some(429 | 502 | 503)) {
            return Self::Transient;
        }
        if Self::TRANSIENT_SIGNATURES
            .iter()
            .any(|sig| message.contains(sig))
        {
            Self::Transient
        } else {
            Self::Fatal
        }
    }
}

impl fmt::Display for SubmissionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

impl BenchError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Build a submission error, classifying it from its text.
    pub fn submission(message: impl Into<String>, status: Option<u16>) -> Self {
        let message = message.into();
        Self::Submission {
            kind: SubmissionErrorKind::classify(&message, status),
            message,
        }
    }

    /// Check if this error is retryable by an HTTP client.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::RateLimited { .. }
                | Self::Overloaded { .. }
                | Self::Network(_)
                | Self::Submission {
                    kind: SubmissionErrorKind::Transient,
                    ..
                }
        )
    }
}

/// Result type alias for judgebench.
pub type Result<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_signatures() {
        assert_eq!(
            SubmissionErrorKind::classify("UNREPORTED_ERROR: busy", None),
            SubmissionErrorKind::Transient
        );
        assert_eq!(
            SubmissionErrorKind::classify("An error occurred, try later", None),
            SubmissionErrorKind::Transient
        );
        assert_eq!(
            SubmissionErrorKind::classify("whatever", Some(503)),
            SubmissionErrorKind::Transient
        );
        assert_eq!(
            SubmissionErrorKind::classify("InputError: bad compiler", Some(200)),
            SubmissionErrorKind::Fatal
        );
    }

    #[test]
    fn test_jutge_error_display() {
        let err = JutgeError {
            name: "NotFoundError".to_string(),
            message: "no such problem".to_string(),
            operation_id: Some("op-1".to_string()),
        };
        assert_eq!(err.to_string(), "NotFoundError: no such problem (operation: op-1)");

        let err = JutgeError {
            name: "InputError".to_string(),
            message: "bad".to_string(),
            operation_id: None,
        };
        assert_eq!(err.to_string(), "InputError: bad");
    }

    #[test]
    fn test_transient_submission_is_retryable() {
        assert!(BenchError::submission("UNREPORTED_ERROR", None).is_retryable());
        assert!(!BenchError::submission("InputError", None).is_retryable());
        assert!(!BenchError::NoEnabledModels.is_retryable());
    }
}
