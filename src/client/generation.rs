//! Solution generation.
//!
//! A [`Generator`] turns a structured problem into source code for one
//! target language. [`ModelAdapter`] is the production implementation on
//! top of [`ChatClient`].

use crate::client::{ChatClient, Message};
use crate::models::{BenchError, ModelProfile, Result, StructuredProblem};
use async_trait::async_trait;
use regex::Regex;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Output of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Extracted source code
    pub text: String,
    pub tokens: u64,
    pub latency: Duration,
}

/// Produces a candidate solution.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, problem: &StructuredProblem, language: &str) -> Result<Generation>;

    /// Longest a single `generate` call may legitimately take, retries
    /// included. `None` leaves the bound to the model's per-call timeout.
    fn time_budget(&self) -> Option<Duration> {
        None
    }
}

const BASE_SYSTEM_PROMPT: &str = "You are an expert competitive programmer. \
Solve programming problems with clean, efficient and correct code.

Output format:
- The program's output must match the expected output character by character.
- Study the sample outputs for spacing, punctuation and separators.

Code:
- Write only the solution code, no explanations.
- Prefer raw code; if you use a markdown block, use exactly one.
- Handle edge cases and respect the constraints.";

/// Human-readable language name for a compiler id.
pub fn language_name(compiler_id: &str) -> &str {
    match compiler_id {
        "Python3" => "Python",
        "G++" | "G++17" | "GXX" => "C++",
        "JDK" => "Java",
        other => other,
    }
}

fn system_prompt(compiler_id: &str) -> String {
    let extra = match compiler_id {
        "Python3" => {
            "\n\nPython:\n- Read with input(), write with print().\n\
             - Keep top-level code at module level; no `return` outside functions."
        }
        "G++" | "G++17" | "GXX" => {
            "\n\nC++:\n- Include a main() function.\n- Use std::cin and std::cout."
        }
        "JDK" => {
            "\n\nJava:\n- Declare a public class named Main with a main method.\n\
             - Use Scanner or BufferedReader for input."
        }
        _ => "",
    };
    format!("{BASE_SYSTEM_PROMPT}{extra}")
}

/// User prompt for a problem.
pub fn build_prompt(problem: &StructuredProblem, compiler_id: &str) -> String {
    let language = language_name(compiler_id);
    let mut prompt = format!("Solve this competitive programming problem in {language}.\n\n");

    if !problem.title.is_empty() {
        let _ = writeln!(prompt, "# {}\n", problem.title);
    }
    let _ = writeln!(prompt, "{}\n", problem.statement.trim());

    for (i, sample) in problem.samples.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "## Sample {}\nInput:\n{}\nExpected Output:\n{}\n",
            i + 1,
            sample.input.trim_end(),
            sample.output.trim_end()
        );
    }

    let _ = write!(prompt, "Write your {language} solution below:");
    prompt
}

fn fence_tags(compiler_id: &str) -> &'static [&'static str] {
    match compiler_id {
        "Python3" => &["python3", "python", "py"],
        "G++" | "G++17" | "GXX" => &["cpp", "c++", "cc"],
        "JDK" => &["java"],
        _ => &[],
    }
}

/// Pull source code out of a model response.
///
/// Prefers a fence tagged with the target language, then any fence, then
/// the whole response trimmed.
pub fn extract_code(response: &str, compiler_id: &str) -> String {
    let Ok(fence) = Regex::new(r"(?s)```([A-Za-z0-9+#_-]*)[ \t]*\r?\n(.*?)```") else {
        return response.trim().to_string();
    };

    let blocks: Vec<(String, &str)> = fence
        .captures_iter(response)
        .filter_map(|c| Some((c.get(1)?.as_str().to_ascii_lowercase(), c.get(2)?.as_str())))
        .collect();

    let tags = fence_tags(compiler_id);
    let chosen = blocks
        .iter()
        .find(|(tag, _)| tags.contains(&tag.as_str()))
        .or_else(|| blocks.iter().find(|(tag, _)| tag.is_empty()))
        .or_else(|| blocks.first());

    match chosen {
        Some((_, code)) => code.trim().to_string(),
        None => response.trim().to_string(),
    }
}

/// Generator backed by a chat-completions endpoint.
pub struct ModelAdapter {
    profile: Arc<ModelProfile>,
    client: Arc<ChatClient>,
}

impl ModelAdapter {
    pub fn new(profile: Arc<ModelProfile>, client: Arc<ChatClient>) -> Self {
        Self { profile, client }
    }
}

#[async_trait]
impl Generator for ModelAdapter {
    async fn generate(&self, problem: &StructuredProblem, language: &str) -> Result<Generation> {
        let start = Instant::now();
        let messages = [
            Message::system(system_prompt(language)),
            Message::user(build_prompt(problem, language)),
        ];

        let response = self
            .client
            .complete(
                &self.profile.model_id,
                &messages,
                self.profile.limits.max_tokens,
                self.profile.limits.temperature,
            )
            .await
            .map_err(|e| BenchError::Generation(e.to_string()))?;

        let text = extract_code(&response.content, language);
        if text.is_empty() {
            return Err(BenchError::Generation("Model returned no code".to_string()));
        }

        debug!(
            model = %self.profile.name,
            problem = %problem.id,
            tokens = response.total_tokens,
            code_len = text.len(),
            "Generated solution"
        );

        Ok(Generation {
            text,
            tokens: response.total_tokens,
            latency: start.elapsed(),
        })
    }

    fn time_budget(&self) -> Option<Duration> {
        Some(self.client.call_budget())
    }
}
