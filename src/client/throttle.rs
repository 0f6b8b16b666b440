//! Per-backend cooldown after rate limiting.
//!
//! Generation backends answer overload with 429 and, usually, a
//! `retry-after` hint. Every worker sharing a backend honors the same
//! cooldown so one rejected call does not turn into a burst of them.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on any single cooldown.
pub(crate) const MAX_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct BackendState {
    consecutive_rejections: u32,
    cooldown_until: Option<Instant>,
}

impl BackendState {
    fn remaining(&self, now: Instant) -> Duration {
        self.cooldown_until
            .filter(|&t| t > now)
            .map(|t| t - now)
            .unwrap_or(Duration::ZERO)
    }

    /// Server hint wins; otherwise 2^n seconds.
    fn reject(&mut self, now: Instant, retry_after: Option<Duration>) -> Duration {
        self.consecutive_rejections += 1;
        let cooldown = retry_after
            .unwrap_or_else(|| Duration::from_secs(2u64.saturating_pow(self.consecutive_rejections)))
            .min(MAX_COOLDOWN);
        self.cooldown_until = Some(now + cooldown);
        cooldown
    }

    fn accept(&mut self) {
        self.consecutive_rejections = 0;
        self.cooldown_until = None;
    }
}

/// Shared cooldown tracker keyed by backend name.
#[derive(Debug, Default)]
pub struct BackendThrottle {
    states: DashMap<String, BackendState>,
    total_calls: AtomicU64,
    total_rejections: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl BackendThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep out any active cooldown for `backend`. Returns the time waited.
    pub async fn wait_if_needed(&self, backend: &str) -> Duration {
        let wait = self
            .states
            .get(backend)
            .map(|s| s.remaining(Instant::now()))
            .unwrap_or(Duration::ZERO);

        if wait > Duration::ZERO {
            debug!(backend = backend, wait_ms = wait.as_millis() as u64, "Cooling down");
            self.total_wait_ms
                .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// Record the HTTP status of one call.
    pub fn record(&self, backend: &str, status: u16, retry_after: Option<Duration>) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.states.entry(backend.to_string()).or_default();

        if status == 429 {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            let cooldown = state.reject(Instant::now(), retry_after);
            warn!(
                backend = backend,
                consecutive = state.consecutive_rejections,
                cooldown_secs = cooldown.as_secs_f64(),
                "Backend rate limited, cooling down"
            );
        } else if status < 400 {
            state.accept();
        }
    }

    pub fn stats(&self) -> ThrottleStats {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let total_rejections = self.total_rejections.load(Ordering::Relaxed);
        ThrottleStats {
            total_calls,
            total_rejections,
            total_wait_secs: self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            backends_tracked: self.states.len(),
        }
    }
}

/// Throttle counters, logged at the end of a shared run.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleStats {
    pub total_calls: u64,
    pub total_rejections: u64,
    pub total_wait_secs: f64,
    pub backends_tracked: usize,
}
