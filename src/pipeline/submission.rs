//! Submission with retry on transient judge failures.

use crate::client::{JudgeService, SubmissionRequest};
use crate::models::{BenchError, Result, SubmissionId};
use crate::pipeline::Clock;
use std::time::Duration;
use tracing::{debug, warn};

/// Default cap on submission tries per attempt.
pub const DEFAULT_SUBMISSION_RETRIES: u32 = 3;

/// A submission the judge accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionOutcome {
    pub id: SubmissionId,
    /// Time spent submitting, backoff included
    pub elapsed: Duration,
    /// Tries used, at least 1
    pub tries: u32,
}

/// Retry/backoff policy for submissions.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionController {
    max_tries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for SubmissionController {
    fn default() -> Self {
        Self::new(DEFAULT_SUBMISSION_RETRIES)
    }
}

impl SubmissionController {
    pub fn new(max_tries: u32) -> Self {
        Self {
            max_tries: max_tries.max(1),
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Delay after the `failures`-th transient failure: `min(5s * n, 30s)`.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        self.base_delay.saturating_mul(failures).min(self.max_delay)
    }

    /// Submit, retrying transient failures until the cap is reached.
    ///
    /// Fatal failures are returned immediately. Exhausting the cap yields
    /// [`BenchError::SubmissionRetriesExhausted`] carrying the last message.
    pub async fn submit(
        &self,
        judge: &dyn JudgeService,
        clock: &dyn Clock,
        request: &SubmissionRequest,
    ) -> Result<SubmissionOutcome> {
        let start = clock.now();
        let mut tries = 0;

        loop {
            tries += 1;
            match judge.submit(request).await {
                Ok(id) => {
                    debug!(problem = %request.problem, submission = %id, tries = tries, "Submitted");
                    return Ok(SubmissionOutcome {
                        id,
                        elapsed: clock.now().saturating_sub(start),
                        tries,
                    });
                }
                Err(e) if e.is_retryable() => {
                    if tries >= self.max_tries {
                        warn!(
                            problem = %request.problem,
                            tries = tries,
                            error = %e,
                            "Submission retries exhausted"
                        );
                        return Err(BenchError::SubmissionRetriesExhausted {
                            attempts: tries,
                            last_error: e.to_string(),
                        });
                    }
                    let delay = self.backoff_delay(tries);
                    warn!(
                        problem = %request.problem,
                        tries = tries,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Transient submission failure, backing off"
                    );
                    clock.sleep(delay).await;
                }
                Err(e) => {
                    warn!(problem = %request.problem, error = %e, "Submission rejected");
                    return Err(e);
                }
            }
        }
    }
}
