//! Jutge API client.
//!
//! Every call is a `POST` of one form field, `data`, holding
//! `{"func", "input", "meta"}`. Answers come back as `multipart/form-data`
//! with a single JSON part `{"output", "error"?, "operation_id"?}` plus
//! optional file parts, which this client ignores.

use crate::client::{JudgeService, ProblemAnalyzer, SubmissionRequest, SubmissionStatus};
use crate::models::{
    BenchError, JudgeCredentials, JutgeError, ProblemRef, Result, SampleCase, StructuredProblem,
    SubmissionDetails, SubmissionId,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

/// Raw answer envelope.
#[derive(Debug, Deserialize)]
struct Answer {
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Option<JutgeError>,
    #[serde(default)]
    operation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialsOut {
    #[serde(default)]
    token: String,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct Testcase {
    #[serde(default)]
    input_b64: String,
    #[serde(default)]
    correct_b64: String,
}

#[derive(Debug, Deserialize)]
struct ProblemRich {
    #[serde(default)]
    title: String,
    #[serde(default)]
    html_statement: String,
    #[serde(default)]
    sample_testcases: Vec<Testcase>,
}

#[derive(Debug, Deserialize)]
struct Submission {
    state: String,
    #[serde(default)]
    veredict: Option<String>,
    #[serde(default)]
    compiler_output: Option<Value>,
    #[serde(default)]
    execution_time: Option<Value>,
    #[serde(default)]
    memory_usage: Option<Value>,
    #[serde(default)]
    score: Option<Value>,
    #[serde(default)]
    test_results: Option<Value>,
}

impl Submission {
    /// Diagnostics fields are loosely typed upstream; unreadable ones are dropped.
    fn details(&self) -> SubmissionDetails {
        SubmissionDetails {
            compiler_output: self
                .compiler_output
                .as_ref()
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            execution_time: self.execution_time.as_ref().and_then(as_number),
            memory_usage: self.memory_usage.as_ref().and_then(as_number),
            score: self.score.as_ref().and_then(as_number),
            test_results: self.test_results.clone().filter(|v| !v.is_null()),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Jutge API client.
///
/// Authentication happens once, in [`JutgeClient::login`]; the token is
/// immutable afterwards so one client can be shared between workers.
pub struct JutgeClient {
    client: reqwest::Client,
    api_url: String,
    timeout: Duration,
    token: Option<String>,
}

impl JutgeClient {
    /// Create an unauthenticated client.
    pub fn new(api_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(BenchError::Network)?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            timeout: Duration::from_secs(timeout_secs),
            token: None,
        })
    }

    /// Log in and return an authenticated client.
    pub async fn login(mut self, credentials: &JudgeCredentials) -> Result<Self> {
        let output = self
            .execute(
                "auth.login",
                json!({ "email": credentials.email, "password": credentials.password }),
            )
            .await?;

        let creds: CredentialsOut = serde_json::from_value(output)
            .map_err(|e| BenchError::Protocol(format!("Bad login answer: {e}")))?;

        if !creds.error.is_empty() || creds.token.is_empty() {
            return Err(BenchError::Judge(JutgeError {
                name: "UnauthorizedError".to_string(),
                message: if creds.error.is_empty() {
                    "empty token".to_string()
                } else {
                    creds.error
                },
                operation_id: None,
            }));
        }

        info!(email = %credentials.email, "Authenticated with judge");
        self.token = Some(creds.token);
        Ok(self)
    }

    fn meta(&self) -> Value {
        match &self.token {
            Some(token) => json!({ "token": token, "exam": null }),
            None => Value::Null,
        }
    }

    /// Call one API function and return its `output`.
    async fn execute(&self, func: &str, input: Value) -> Result<Value> {
        let payload = json!({ "func": func, "input": input, "meta": self.meta() });
        let payload = serde_json::to_string(&payload)
            .map_err(|e| BenchError::Internal(format!("Serializing request: {e}")))?;

        let response = self
            .client
            .post(&self.api_url)
            .form(&[("data", payload)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BenchError::Timeout(self.timeout)
                } else {
                    BenchError::Network(e)
                }
            })?;

        let status = response.status().as_u16();
        if matches!(status, 429 | 502 | 503) {
            return Err(BenchError::Overloaded { status });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await.map_err(BenchError::Network)?;

        if !(200..300).contains(&status) && !content_type.starts_with("multipart/") {
            return Err(BenchError::Protocol(format!(
                "HTTP {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        let answer = parse_answer(&content_type, &body)?;
        debug!(func = func, operation_id = ?answer.operation_id, "Judge call answered");

        match answer.error {
            Some(error) => Err(BenchError::Judge(JutgeError {
                operation_id: error.operation_id.or(answer.operation_id),
                ..error
            })),
            None => Ok(answer.output),
        }
    }
}

/// Extract the JSON envelope from a response body.
fn parse_answer(content_type: &str, body: &[u8]) -> Result<Answer> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let json_part = match mime.as_str() {
        "application/json" => String::from_utf8_lossy(body).into_owned(),
        "multipart/form-data" => {
            let boundary = content_type
                .split(';')
                .filter_map(|p| p.trim().strip_prefix("boundary="))
                .next()
                .map(|b| b.trim_matches('"').to_string())
                .ok_or_else(|| BenchError::Protocol("Multipart answer without boundary".into()))?;
            find_json_part(&String::from_utf8_lossy(body), &boundary)?
        }
        other => {
            return Err(BenchError::Protocol(format!(
                "Unexpected content type '{other}'"
            )));
        }
    };

    let answer: Answer = serde_json::from_str(&json_part)
        .map_err(|e| BenchError::Protocol(format!("Answer is not a JSON object: {e}")))?;
    Ok(answer)
}

/// The single part without its own `Content-Type` header.
fn find_json_part(body: &str, boundary: &str) -> Result<String> {
    let delimiter = format!("--{boundary}");
    let mut found: Option<String> = None;

    for part in body.split(delimiter.as_str()) {
        let part = part.trim_start_matches("\r\n");
        if part.is_empty() || part.starts_with("--") {
            continue;
        }
        let Some((headers, content)) = part.split_once("\r\n\r\n") else {
            continue;
        };
        let is_file = headers
            .lines()
            .any(|h| h.to_ascii_lowercase().starts_with("content-type:"));
        if is_file {
            continue;
        }
        if found.is_some() {
            return Err(BenchError::Protocol(
                "Multiple parts with JSON content".into(),
            ));
        }
        found = Some(content.trim_end_matches("\r\n").to_string());
    }

    found.ok_or_else(|| BenchError::Protocol("No JSON part in answer".into()))
}

/// Plain text from an HTML statement.
fn strip_html(html: &str) -> String {
    let Ok(tags) = Regex::new(r"(?s)<[^>]*>") else {
        return html.to_string();
    };
    let text = tags.replace_all(html, " ");
    let text = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_b64(data: &str) -> String {
    BASE64
        .decode(data.trim())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn into_submission_error(err: BenchError) -> BenchError {
    match err {
        BenchError::Submission { .. } => err,
        BenchError::Overloaded { status } => BenchError::submission(err.to_string(), Some(status)),
        other => BenchError::submission(other.to_string(), None),
    }
}

#[async_trait]
impl ProblemAnalyzer for JutgeClient {
    async fn analyze(&self, problem: &ProblemRef) -> Result<StructuredProblem> {
        let analysis_error = |message: String| BenchError::Analysis {
            problem_id: problem.to_string(),
            message,
        };

        let output = self
            .execute("problems.getProblemRich", json!(problem.as_str()))
            .await
            .map_err(|e| analysis_error(e.to_string()))?;

        let rich: ProblemRich =
            serde_json::from_value(output).map_err(|e| analysis_error(e.to_string()))?;

        let samples = rich
            .sample_testcases
            .iter()
            .map(|t| SampleCase {
                input: decode_b64(&t.input_b64),
                output: decode_b64(&t.correct_b64),
            })
            .collect();

        Ok(StructuredProblem {
            id: problem.to_string(),
            title: rich.title,
            statement: strip_html(&rich.html_statement),
            samples,
        })
    }
}

#[async_trait]
impl JudgeService for JutgeClient {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionId> {
        let output = self
            .execute(
                "student.submissions.submit",
                json!({
                    "problem_id": request.problem.as_str(),
                    "compiler_id": request.language,
                    "code": request.source,
                    "annotation": request.note,
                }),
            )
            .await
            .map_err(into_submission_error)?;

        match output {
            Value::String(id) if !id.is_empty() => Ok(SubmissionId::new(id)),
            Value::Object(map) => map
                .get("submission_id")
                .and_then(Value::as_str)
                .map(SubmissionId::new)
                .ok_or_else(|| BenchError::submission("Submit answer without submission id", None)),
            other => Err(BenchError::submission(
                format!("Unexpected submit answer: {other}"),
                None,
            )),
        }
    }

    async fn status(
        &self,
        problem: &ProblemRef,
        submission: &SubmissionId,
    ) -> Result<SubmissionStatus> {
        let output = self
            .execute(
                "student.submissions.get",
                json!({
                    "problem_id": problem.as_str(),
                    "submission_id": submission.as_str(),
                }),
            )
            .await
            .map_err(|e| BenchError::Query(e.to_string()))?;

        let submission: Submission =
            serde_json::from_value(output).map_err(|e| BenchError::Query(e.to_string()))?;

        Ok(if submission.state == "done" {
            SubmissionStatus::done(submission.veredict.as_deref()).with_details(submission.details())
        } else {
            SubmissionStatus::pending(submission.state)
        })
    }
}
