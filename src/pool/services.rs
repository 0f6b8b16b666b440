//! Backend wiring for workers.
//!
//! [`SharedServices`] hands every worker the same judge session and one
//! cached generator per model. [`IsolatedServices`] builds everything from
//! scratch on each call, so a worker shares no state with its siblings.

use crate::client::{
    BackendThrottle, ChatClient, Generator, JutgeClient, ModelAdapter, ThrottleStats,
};
use crate::models::{BenchError, Config, JudgeConfig, JudgeCredentials, ModelProfile, Result};
use crate::pipeline::TaskServices;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Retries the chat client makes on its own before giving up.
const GENERATION_HTTP_RETRIES: u32 = 3;

/// Supplies the backends a task needs.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    async fn services_for(&self, model: &Arc<ModelProfile>) -> Result<TaskServices>;

    /// Rate-limit counters across every generator handed out, if tracked.
    fn throttle_stats(&self) -> Option<ThrottleStats> {
        None
    }
}

/// Build a generator for one profile.
pub fn build_generator(
    profile: &Arc<ModelProfile>,
    throttle: Arc<BackendThrottle>,
) -> Result<Arc<dyn Generator>> {
    let api_key = Config::resolve_model_api_key(profile)?;
    let base_url = profile.base_url().ok_or_else(|| {
        BenchError::InvalidInput(format!("model '{}' has no base_url", profile.name))
    })?;

    let client = ChatClient::new(
        profile.name.clone(),
        api_key,
        base_url,
        profile.limits.timeout_secs,
        GENERATION_HTTP_RETRIES,
        throttle,
    )?;

    Ok(Arc::new(ModelAdapter::new(
        Arc::clone(profile),
        Arc::new(client),
    )))
}

async fn connect_judge(config: &JudgeConfig, credentials: &JudgeCredentials) -> Result<JutgeClient> {
    JutgeClient::new(&config.api_url, config.timeout_secs)?
        .login(credentials)
        .await
}

/// One judge session and a generator cache shared by all workers.
pub struct SharedServices {
    judge: Arc<JutgeClient>,
    throttle: Arc<BackendThrottle>,
    generators: DashMap<String, Arc<dyn Generator>>,
}

impl SharedServices {
    /// Log in once and return a provider for the whole run.
    pub async fn connect(config: &Config) -> Result<Self> {
        let credentials = config.resolve_judge_credentials()?;
        let judge = connect_judge(&config.judge, &credentials).await?;
        info!(api_url = %config.judge.api_url, "Shared judge session ready");

        Ok(Self {
            judge: Arc::new(judge),
            throttle: Arc::new(BackendThrottle::new()),
            generators: DashMap::new(),
        })
    }
}

#[async_trait]
impl ServiceProvider for SharedServices {
    async fn services_for(&self, model: &Arc<ModelProfile>) -> Result<TaskServices> {
        let cached = self
            .generators
            .get(&model.name)
            .map(|g| Arc::clone(g.value()));
        let generator = match cached {
            Some(g) => g,
            None => {
                let built = build_generator(model, Arc::clone(&self.throttle))?;
                debug!(model = %model.name, "Created generator");
                Arc::clone(
                    self.generators
                        .entry(model.name.clone())
                        .or_insert(built)
                        .value(),
                )
            }
        };

        Ok(TaskServices {
            analyzer: self.judge.clone(),
            judge: self.judge.clone(),
            generator,
        })
    }

    fn throttle_stats(&self) -> Option<ThrottleStats> {
        Some(self.throttle.stats())
    }
}

/// Fresh sessions and clients for every task.
pub struct IsolatedServices {
    judge: JudgeConfig,
    credentials: JudgeCredentials,
}

impl IsolatedServices {
    /// Resolves credentials up front so a bad login fails the run, not each task.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            judge: config.judge.clone(),
            credentials: config.resolve_judge_credentials()?,
        })
    }
}

#[async_trait]
impl ServiceProvider for IsolatedServices {
    async fn services_for(&self, model: &Arc<ModelProfile>) -> Result<TaskServices> {
        let judge = Arc::new(connect_judge(&self.judge, &self.credentials).await?);
        let generator = build_generator(model, Arc::new(BackendThrottle::new()))?;

        Ok(TaskServices {
            analyzer: judge.clone(),
            judge,
            generator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderKind;

    #[test]
    fn test_build_generator_needs_base_url() {
        let mut profile = ModelProfile::new("local", ProviderKind::Compatible, "llama");
        let err = build_generator(&Arc::new(profile.clone()), Arc::new(BackendThrottle::new()))
            .err()
            .unwrap();
        assert!(matches!(err, BenchError::InvalidInput(_)));

        profile.base_url = Some("http://localhost:11434/v1".to_string());
        assert!(build_generator(&Arc::new(profile), Arc::new(BackendThrottle::new())).is_ok());
    }

    #[test]
    fn test_build_generator_reports_missing_key() {
        let mut profile = ModelProfile::new("m", ProviderKind::Openai, "gpt-4o");
        profile.api_key_env = Some("JUDGEBENCH_TEST_UNSET_KEY".to_string());
        let err = build_generator(&Arc::new(profile), Arc::new(BackendThrottle::new()))
            .err()
            .unwrap();
        assert!(matches!(err, BenchError::Config(_)));
    }

    #[tokio::test]
    async fn test_shared_services_report_throttle_and_cache_generators() {
        let shared = SharedServices {
            judge: Arc::new(JutgeClient::new("http://localhost:9/api", 5).unwrap()),
            throttle: Arc::new(BackendThrottle::new()),
            generators: DashMap::new(),
        };
        let mut profile = ModelProfile::new("local", ProviderKind::Compatible, "llama");
        profile.base_url = Some("http://localhost:11434/v1".to_string());
        let profile = Arc::new(profile);

        let first = shared.services_for(&profile).await.unwrap();
        let second = shared.services_for(&profile).await.unwrap();
        assert!(Arc::ptr_eq(&first.generator, &second.generator));

        shared
            .throttle
            .record("local", 429, Some(std::time::Duration::from_secs(1)));
        let stats = shared.throttle_stats().unwrap();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.total_rejections, 1);
        assert_eq!(stats.backends_tracked, 1);
    }
}
