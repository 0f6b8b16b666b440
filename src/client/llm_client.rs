//! Chat-completions client for OpenAI-compatible generation backends.
//!
//! OpenAI, OpenRouter and self-hosted servers (vLLM, Ollama, llama.cpp)
//! all speak the same `/chat/completions` schema, so one client covers
//! every provider kind.

use crate::client::BackendThrottle;
use crate::client::throttle::MAX_COOLDOWN;
use crate::models::{BenchError, ProviderError, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Response from a completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,
    pub total_tokens: u64,
    /// Wall time including retries
    pub duration: Duration,
}

/// Seconds from a `retry-after` header. Negative, non-finite and absurd
/// values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Client for one OpenAI-compatible endpoint.
pub struct ChatClient {
    client: reqwest::Client,
    /// Endpoint name, also the throttle key
    name: String,
    /// None for local endpoints without auth
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    throttle: Arc<BackendThrottle>,
}

impl ChatClient {
    pub fn new(
        name: impl Into<String>,
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout_secs: u64,
        max_retries: u32,
        throttle: Arc<BackendThrottle>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BenchError::Network)?;

        Ok(Self {
            client,
            name: name.into(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            max_retries: max_retries.max(1),
            throttle,
        })
    }

    /// Worst case for one [`ChatClient::complete`]: every try runs into its
    /// request timeout after sitting out the longest cooldown.
    pub fn call_budget(&self) -> Duration {
        (self.timeout + MAX_COOLDOWN) * self.max_retries
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| BenchError::InvalidInput(format!("API key for {}: {e}", self.name)))?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-title", HeaderValue::from_static("judgebench"));
        Ok(headers)
    }

    /// Run one chat completion, retrying network errors, 429s and 5xx.
    pub async fn complete(
        &self,
        model_id: &str,
        messages: &[Message],
        max_tokens: u32,
        temperature: f64,
    ) -> Result<CompletionResponse> {
        let start = Instant::now();
        let request = ChatCompletionRequest {
            model: model_id,
            messages,
            max_tokens,
            temperature,
        };
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.headers()?;
        let mut last_error: Option<BenchError> = None;

        for attempt in 0..self.max_retries {
            let is_last = attempt + 1 == self.max_retries;
            self.throttle.wait_if_needed(&self.name).await;

            let response = match self
                .client
                .post(&url)
                .headers(headers.clone())
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        BenchError::Timeout(self.timeout)
                    } else {
                        BenchError::Network(e)
                    });
                    if !is_last {
                        let backoff = Duration::from_secs(2u64.pow(attempt));
                        debug!(
                            endpoint = %self.name,
                            attempt = attempt,
                            backoff_secs = backoff.as_secs(),
                            "Retrying after network error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            self.throttle.record(&self.name, status, retry_after);

            if status == 429 {
                // Throttle already holds the cooldown; the next iteration waits it out.
                last_error = Some(BenchError::RateLimited {
                    retry_after_secs: retry_after.map_or(1.0, |d| d.as_secs_f64()),
                });
                continue;
            }

            if !response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorResponse>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                let error = match status {
                    401 | 403 => ProviderError::AuthenticationFailed,
                    404 => ProviderError::ModelNotFound(model_id.to_string()),
                    _ => ProviderError::ApiError { status, message },
                };
                last_error = Some(BenchError::Provider(error));

                if matches!(status, 400..=499) {
                    break;
                }
                if !is_last {
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
                continue;
            }

            let body: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|e| BenchError::ParseError(format!("Failed to parse response: {e}")))?;

            let content = body
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| {
                    BenchError::Provider(ProviderError::InvalidResponse(
                        "No content in response".to_string(),
                    ))
                })?;

            let usage = body.usage.unwrap_or_default();
            let total = if usage.total_tokens > 0 {
                usage.total_tokens
            } else {
                usage.prompt_tokens + usage.completion_tokens
            };

            return Ok(CompletionResponse {
                content,
                total_tokens: total,
                duration: start.elapsed(),
            });
        }

        Err(last_error.unwrap_or_else(|| {
            BenchError::Provider(ProviderError::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: "Unknown error".to_string(),
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_chat_schema() {
        let messages = vec![Message::system("sys"), Message::user("hi")];
        let request = ChatCompletionRequest {
            model: "gpt-4o",
            messages: &messages,
            max_tokens: 2000,
            temperature: 0.1,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 2000);
    }

    #[test]
    fn test_response_tolerates_missing_usage_and_content() {
        let body: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert!(body.usage.is_none());
        assert!(body.choices[0].message.content.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ChatClient::new(
            "local",
            None,
            "http://localhost:8000/v1/",
            5,
            0,
            Arc::new(BackendThrottle::new()),
        )
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:8000/v1");
        assert_eq!(client.max_retries, 1);
    }

    #[test]
    fn test_retry_after_rejects_hostile_values() {
        assert_eq!(parse_retry_after("4"), Some(Duration::from_secs(4)));
        assert_eq!(parse_retry_after(" 0.5 "), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("NaN"), None);
        assert_eq!(parse_retry_after("inf"), None);
        assert_eq!(parse_retry_after("-3"), None);
        assert_eq!(parse_retry_after("1e300"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_call_budget_covers_every_retry_and_cooldown() {
        let client = ChatClient::new(
            "local",
            None,
            "http://localhost:8000/v1",
            3,
            3,
            Arc::new(BackendThrottle::new()),
        )
        .unwrap();
        assert_eq!(client.call_budget(), Duration::from_secs(3 * (3 + 60)));
        assert!(client.call_budget() > client.timeout + MAX_COOLDOWN);
    }
}
