//! Configuration models for judgebench.
//!
//! Everything the core needs from the outside world is parameterized here
//! and loaded once, from a TOML file, before a run starts.

use super::{ModelProfile, ProblemSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration for judgebench.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Judging service connection
    #[serde(default)]
    pub judge: JudgeConfig,

    /// Run settings
    #[serde(default)]
    pub run: RunConfig,

    /// Models under benchmark
    #[serde(default)]
    pub models: Vec<ModelProfile>,

    /// Problem sets by name
    #[serde(default)]
    pub problem_sets: BTreeMap<String, Vec<String>>,
}

/// Judging service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// API endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Account email (supports `${VAR}` expansion)
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default = "default_email_env")]
    pub email_env: String,

    /// Account password (supports `${VAR}` expansion)
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Compiler id sent with every submission
    #[serde(default = "default_language")]
    pub language: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_judge_timeout")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.jutge.org/api".to_string()
}

fn default_email_env() -> String {
    "JUTGE_EMAIL".to_string()
}

fn default_password_env() -> String {
    "JUTGE_PASSWORD".to_string()
}

fn default_language() -> String {
    "Python3".to_string()
}

fn default_judge_timeout() -> u64 {
    30
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            email: None,
            email_env: default_email_env(),
            password: None,
            password_env: default_password_env(),
            language: default_language(),
            timeout_secs: default_judge_timeout(),
        }
    }
}

/// Resolved judging service login.
#[derive(Clone)]
pub struct JudgeCredentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for JudgeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JudgeCredentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// How much concurrency to apply across the task matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelStrategy {
    /// Every (model, problem) pair dispatched together
    #[default]
    Full,
    /// One model at a time, its problems dispatched together
    Models,
    /// One task at a time, in list order
    Sequential,
}

impl fmt::Display for ParallelStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Models => write!(f, "models"),
            Self::Sequential => write!(f, "sequential"),
        }
    }
}

impl FromStr for ParallelStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "models" => Ok(Self::Models),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!(
                "unknown strategy '{other}' (expected full, models or sequential)"
            )),
        }
    }
}

/// Concurrency substrate for workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Substrate {
    /// Workers share one runtime and one set of connections
    #[default]
    Shared,
    /// Each worker gets its own thread, runtime and connections
    Isolated,
}

impl fmt::Display for Substrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Isolated => write!(f, "isolated"),
        }
    }
}

impl FromStr for Substrate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shared" | "thread" | "threads" => Ok(Self::Shared),
            "isolated" | "process" | "processes" => Ok(Self::Isolated),
            other => Err(format!(
                "unknown substrate '{other}' (expected shared or isolated)"
            )),
        }
    }
}

/// Run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub strategy: ParallelStrategy,

    /// Generation attempts per task
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Verdict polling budget in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Delay between status queries in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Consecutive failed status queries tolerated before giving up
    #[serde(default = "default_max_query_errors")]
    pub max_query_errors: u32,

    /// Submission calls per attempt, including the first
    #[serde(default = "default_submission_retries")]
    pub submission_retries: u32,

    /// Worker pool size; defaults to min(available parallelism, 8)
    #[serde(default)]
    pub max_workers: Option<usize>,

    #[serde(default)]
    pub substrate: Substrate,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_poll_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    2
}

fn default_max_query_errors() -> u32 {
    10
}

fn default_submission_retries() -> u32 {
    3
}

/// Upper bound on the default worker count.
pub const MAX_DEFAULT_WORKERS: usize = 8;

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strategy: ParallelStrategy::default(),
            max_attempts: default_max_attempts(),
            poll_timeout_secs: default_poll_timeout(),
            poll_interval_secs: default_poll_interval(),
            max_query_errors: default_max_query_errors(),
            submission_retries: default_submission_retries(),
            max_workers: None,
            substrate: Substrate::default(),
        }
    }
}

impl RunConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Effective worker count.
    pub fn workers(&self) -> usize {
        self.max_workers
            .filter(|&n| n > 0)
            .unwrap_or_else(default_workers)
    }
}

/// min(available parallelism, 8).
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Look up a problem set by name.
    pub fn problem_set(&self, name: &str) -> Option<ProblemSet> {
        self.problem_sets
            .get(name)
            .map(|ids| ProblemSet::new(name, ids.iter().map(String::as_str)))
    }

    /// Resolve the judging service login from config or environment.
    pub fn resolve_judge_credentials(&self) -> Result<JudgeCredentials, ConfigError> {
        let email = resolve_secret(self.judge.email.as_deref(), &self.judge.email_env)?;
        let password = resolve_secret(self.judge.password.as_deref(), &self.judge.password_env)?;
        Ok(JudgeCredentials { email, password })
    }

    /// Resolve a model's API key.
    ///
    /// `Ok(None)` is valid for compatible endpoints that need no auth.
    pub fn resolve_model_api_key(profile: &ModelProfile) -> Result<Option<String>, ConfigError> {
        if let Some(key) = &profile.api_key {
            return Ok(Some(expand_env_vars(key)));
        }

        let env_var = profile
            .api_key_env
            .as_deref()
            .or_else(|| profile.provider.default_api_key_env());

        match env_var {
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| ConfigError::MissingApiKey {
                    model: profile.name.clone(),
                    env_var: var.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Models that are enabled and whose credentials resolve.
    pub fn enabled_models(&self) -> Vec<ModelProfile> {
        self.models
            .iter()
            .filter(|m| m.enabled)
            .filter(|m| match Self::resolve_model_api_key(m) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(model = %m.name, error = %e, "Skipping model");
                    false
                }
            })
            .cloned()
            .collect()
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if !seen.insert(model.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate model name '{}'",
                    model.name
                )));
            }
            if model.base_url().is_none() {
                return Err(ConfigError::Invalid(format!(
                    "model '{}' uses provider '{}' but sets no base_url",
                    model.name, model.provider
                )));
            }
        }
        if self.run.max_attempts == 0 {
            return Err(ConfigError::Invalid("run.max_attempts must be at least 1".into()));
        }
        if self.run.submission_retries == 0 {
            return Err(ConfigError::Invalid(
                "run.submission_retries must be at least 1".into(),
            ));
        }
        if self.run.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "run.poll_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_secret(explicit: Option<&str>, env_var: &str) -> Result<String, ConfigError> {
    if let Some(value) = explicit {
        return Ok(expand_env_vars(value));
    }
    std::env::var(env_var).map_err(|_| ConfigError::MissingCredential {
        env_var: env_var.to_string(),
    })
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key for model '{model}': set {env_var} env var or api_key in config")]
    MissingApiKey { model: String, env_var: String },

    #[error("Missing judge credential: set {env_var} env var or the value in [judge]")]
    MissingCredential { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
