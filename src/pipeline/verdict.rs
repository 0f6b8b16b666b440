//! Verdict polling.
//!
//! The judge offers no callbacks, so a submission is polled until it reaches
//! a terminal state. The loop is an explicit [`PollState`] advanced by the
//! pure [`transition`] function; [`VerdictPoller`] only feeds it events and
//! sleeps between queries. Neither a slow query nor the last sleep may carry
//! polling past its budget.

use crate::client::{JudgeService, SubmissionState, SubmissionStatus};
use crate::models::{ProblemRef, RunConfig, SubmissionDetails, SubmissionId, Verdict};
use crate::pipeline::Clock;
use std::time::Duration;
use tracing::{debug, warn};

/// Polling budget and cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    /// Budget measured from the moment polling starts
    pub timeout: Duration,
    pub interval: Duration,
    /// Consecutive failed queries before giving up
    pub max_query_errors: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(2),
            max_query_errors: 10,
        }
    }
}

impl From<&RunConfig> for PollSettings {
    fn from(run: &RunConfig) -> Self {
        Self {
            timeout: run.poll_timeout(),
            interval: run.poll_interval(),
            max_query_errors: run.max_query_errors.max(1),
        }
    }
}

/// Where a submission's polling stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Pending { polls: u32, consecutive_errors: u32 },
    Done(Verdict),
    TimedOut,
    QueryFailed,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::TimedOut | Self::QueryFailed)
    }

    /// Verdict recorded for this state, once terminal.
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Self::Done(v) => Some(*v),
            Self::TimedOut => Some(Verdict::Timeout),
            Self::QueryFailed => Some(Verdict::Unknown),
            Self::Submitted | Self::Pending { .. } => None,
        }
    }

    fn counters(&self) -> (u32, u32) {
        match self {
            Self::Pending {
                polls,
                consecutive_errors,
            } => (*polls, *consecutive_errors),
            _ => (0, 0),
        }
    }
}

/// Input to one transition.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// Time passed without a query
    Tick,
    Status(SubmissionStatus),
    QueryFailed(String),
}

/// Map the judge's verdict field of a done submission.
fn terminal_verdict(raw: Option<&str>) -> Verdict {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Verdict::NoVerdict,
        Some(code) => Verdict::from_judge_code(code).unwrap_or_else(|| {
            warn!(code = code, "Unrecognised verdict code");
            Verdict::Unknown
        }),
    }
}

/// Advance the polling state.
///
/// Terminal states absorb every event. A done status wins over the budget
/// check; otherwise `elapsed >= timeout` always yields `TimedOut`.
pub fn transition(
    state: PollState,
    elapsed: Duration,
    event: PollEvent,
    settings: &PollSettings,
) -> PollState {
    if state.is_terminal() {
        return state;
    }

    let (polls, errors) = state.counters();
    let next = match event {
        PollEvent::Status(SubmissionStatus {
            state: SubmissionState::Done,
            verdict,
            ..
        }) => return PollState::Done(terminal_verdict(verdict.as_deref())),
        PollEvent::Status(_) => PollState::Pending {
            polls: polls + 1,
            consecutive_errors: 0,
        },
        PollEvent::QueryFailed(_) if errors + 1 >= settings.max_query_errors => {
            return PollState::QueryFailed;
        }
        PollEvent::QueryFailed(_) => PollState::Pending {
            polls: polls + 1,
            consecutive_errors: errors + 1,
        },
        PollEvent::Tick => state,
    };

    if elapsed >= settings.timeout {
        PollState::TimedOut
    } else {
        next
    }
}

/// Result of polling one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub verdict: Verdict,
    pub state: PollState,
    /// Diagnostics from the done status, if the judge sent any
    pub details: Option<SubmissionDetails>,
    /// Status queries issued
    pub queries: u32,
    pub elapsed: Duration,
}

/// Drives [`transition`] against a live judge.
#[derive(Debug, Clone, Default)]
pub struct VerdictPoller {
    settings: PollSettings,
}

impl VerdictPoller {
    pub fn new(settings: PollSettings) -> Self {
        Self { settings }
    }

    /// Poll until done, out of budget, or the judge keeps failing.
    pub async fn poll(
        &self,
        judge: &dyn JudgeService,
        clock: &dyn Clock,
        problem: &ProblemRef,
        submission: &SubmissionId,
    ) -> PollOutcome {
        let start = clock.now();
        let mut state = PollState::Submitted;
        let mut details = None;
        let mut queries = 0;

        loop {
            let elapsed = clock.now().saturating_sub(start);
            if elapsed >= self.settings.timeout {
                state = transition(state, elapsed, PollEvent::Tick, &self.settings);
                break;
            }
            let remaining = self.settings.timeout - elapsed;

            queries += 1;
            let event = tokio::select! {
                biased;
                answer = judge.status(problem, submission) => match answer {
                    Ok(status) => {
                        debug!(submission = %submission, state = ?status.state, "Polled status");
                        if status.is_done() {
                            details = status.details.clone();
                        }
                        PollEvent::Status(status)
                    }
                    Err(e) => {
                        warn!(submission = %submission, error = %e, "Status query failed, will retry");
                        PollEvent::QueryFailed(e.to_string())
                    }
                },
                _ = clock.sleep(remaining) => {
                    warn!(submission = %submission, "Status query still running when the budget ran out");
                    PollEvent::Tick
                }
            };

            let elapsed = clock.now().saturating_sub(start);
            state = transition(state, elapsed, event, &self.settings);
            if state.is_terminal() {
                break;
            }
            let remaining = self.settings.timeout.saturating_sub(elapsed);
            clock.sleep(self.settings.interval.min(remaining)).await;
        }

        let elapsed = clock.now().saturating_sub(start);
        match &state {
            PollState::TimedOut => warn!(
                submission = %submission,
                elapsed_secs = elapsed.as_secs(),
                "Verdict polling timed out"
            ),
            PollState::QueryFailed => warn!(
                submission = %submission,
                queries = queries,
                "Giving up after repeated status query failures"
            ),
            _ => {}
        }

        PollOutcome {
            verdict: state.verdict().unwrap_or(Verdict::Unknown),
            state,
            details,
            queries,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SubmissionRequest;
    use crate::models::{BenchError, Result};
    use crate::pipeline::{ManualClock, TokioClock};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn settings() -> PollSettings {
        PollSettings::default()
    }

    #[test]
    fn test_done_status_yields_verdict() {
        let next = transition(
            PollState::Submitted,
            Duration::from_secs(1),
            PollEvent::Status(SubmissionStatus::done(Some("WA"))),
            &settings(),
        );
        assert_eq!(next, PollState::Done(Verdict::WrongAnswer));
    }

    #[test]
    fn test_done_without_verdict_is_no_verdict() {
        let next = transition(
            PollState::Submitted,
            Duration::ZERO,
            PollEvent::Status(SubmissionStatus::done(None)),
            &settings(),
        );
        assert_eq!(next, PollState::Done(Verdict::NoVerdict));

        let next = transition(
            PollState::Submitted,
            Duration::ZERO,
            PollEvent::Status(SubmissionStatus::done(Some("ZZ"))),
            &settings(),
        );
        assert_eq!(next, PollState::Done(Verdict::Unknown));
    }

    #[test]
    fn test_budget_expiry_times_out() {
        let next = transition(
            PollState::Pending {
                polls: 3,
                consecutive_errors: 0,
            },
            Duration::from_secs(60),
            PollEvent::Status(SubmissionStatus::pending("pending")),
            &settings(),
        );
        assert_eq!(next, PollState::TimedOut);
    }

    #[test]
    fn test_terminal_states_absorb_events() {
        let next = transition(
            PollState::TimedOut,
            Duration::from_secs(61),
            PollEvent::Status(SubmissionStatus::done(Some("AC"))),
            &settings(),
        );
        assert_eq!(next, PollState::TimedOut);
        assert_eq!(next.verdict(), Some(Verdict::Timeout));
    }

    #[test]
    fn test_query_errors_reset_on_success_and_cap() {
        let s = PollSettings {
            max_query_errors: 2,
            ..settings()
        };
        let t = Duration::from_secs(1);
        let state = transition(PollState::Submitted, t, PollEvent::QueryFailed("x".into()), &s);
        assert_eq!(
            state,
            PollState::Pending {
                polls: 1,
                consecutive_errors: 1
            }
        );
        let state = transition(
            state,
            t,
            PollEvent::Status(SubmissionStatus::pending("queued")),
            &s,
        );
        assert_eq!(
            state,
            PollState::Pending {
                polls: 2,
                consecutive_errors: 0
            }
        );
        let state = transition(state, t, PollEvent::QueryFailed("x".into()), &s);
        let state = transition(state, t, PollEvent::QueryFailed("x".into()), &s);
        assert_eq!(state, PollState::QueryFailed);
        assert_eq!(state.verdict(), Some(Verdict::Unknown));
    }

    /// Judge whose status answers come from a script; the last answer repeats.
    struct StatusScript {
        answers: Mutex<Vec<Result<SubmissionStatus>>>,
        calls: Mutex<u32>,
    }

    impl StatusScript {
        fn new(answers: Vec<Result<SubmissionStatus>>) -> Self {
            Self {
                answers: Mutex::new(answers),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl JudgeService for StatusScript {
        async fn submit(&self, _: &SubmissionRequest) -> Result<SubmissionId> {
            Ok(SubmissionId::new("S"))
        }

        async fn status(&self, _: &ProblemRef, _: &SubmissionId) -> Result<SubmissionStatus> {
            *self.calls.lock().unwrap() += 1;
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.remove(0)
            } else {
                match &answers[0] {
                    Ok(s) => Ok(s.clone()),
                    Err(e) => Err(BenchError::Query(e.to_string())),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_poller_never_done_times_out_at_budget() {
        let judge = StatusScript::new(vec![Ok(SubmissionStatus::pending("pending"))]);
        let clock = ManualClock::new();

        let outcome = VerdictPoller::default()
            .poll(&judge, &clock, &ProblemRef::new("P1"), &SubmissionId::new("S"))
            .await;

        assert_eq!(outcome.verdict, Verdict::Timeout);
        assert_eq!(outcome.elapsed, Duration::from_secs(60));
        assert_eq!(outcome.queries, 30);
        assert_eq!(*judge.calls.lock().unwrap(), 30);
    }

    #[tokio::test]
    async fn test_poller_survives_flaky_query() {
        let judge = StatusScript::new(vec![
            Err(BenchError::Query("boom".into())),
            Ok(SubmissionStatus::pending("judging")),
            Ok(SubmissionStatus::done(Some("AC"))),
        ]);
        let clock = ManualClock::new();

        let outcome = VerdictPoller::default()
            .poll(&judge, &clock, &ProblemRef::new("P1"), &SubmissionId::new("S"))
            .await;

        assert_eq!(outcome.verdict, Verdict::Accepted);
        assert_eq!(outcome.queries, 3);
        assert_eq!(outcome.elapsed, Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_poller_gives_up_on_persistent_query_errors() {
        let judge = StatusScript::new(vec![Err(BenchError::Query("down".into()))]);
        let clock = ManualClock::new();
        let poller = VerdictPoller::new(PollSettings {
            max_query_errors: 3,
            ..PollSettings::default()
        });

        let outcome = poller
            .poll(&judge, &clock, &ProblemRef::new("P1"), &SubmissionId::new("S"))
            .await;

        assert_eq!(outcome.state, PollState::QueryFailed);
        assert_eq!(outcome.verdict, Verdict::Unknown);
        assert_eq!(outcome.queries, 3);
    }

    /// Judge whose status call takes `delay` before answering pending;
    /// `None` never answers at all.
    struct SlowJudge {
        delay: Option<Duration>,
    }

    #[async_trait]
    impl JudgeService for SlowJudge {
        async fn submit(&self, _: &SubmissionRequest) -> Result<SubmissionId> {
            Ok(SubmissionId::new("S"))
        }

        async fn status(&self, _: &ProblemRef, _: &SubmissionId) -> Result<SubmissionStatus> {
            match self.delay {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(SubmissionStatus::pending("judging"))
                }
                None => std::future::pending::<Result<SubmissionStatus>>().await,
            }
        }
    }

    #[tokio::test]
    async fn test_hung_query_cannot_outlive_budget() {
        let judge = SlowJudge { delay: None };
        let clock = ManualClock::new();
        let poller = VerdictPoller::new(PollSettings {
            timeout: Duration::from_secs(10),
            ..PollSettings::default()
        });

        let outcome = poller
            .poll(&judge, &clock, &ProblemRef::new("P1"), &SubmissionId::new("S"))
            .await;

        assert_eq!(outcome.state, PollState::TimedOut);
        assert_eq!(outcome.verdict, Verdict::Timeout);
        assert_eq!(outcome.elapsed, Duration::from_secs(10));
        assert_eq!(outcome.queries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_on_wall_clock_stops_at_budget() {
        let judge = SlowJudge {
            delay: Some(Duration::from_secs(3)),
        };
        let clock = TokioClock::new();
        let poller = VerdictPoller::new(PollSettings {
            timeout: Duration::from_millis(500),
            interval: Duration::from_millis(100),
            max_query_errors: 10,
        });

        let outcome = poller
            .poll(&judge, &clock, &ProblemRef::new("P1"), &SubmissionId::new("S"))
            .await;

        assert_eq!(outcome.verdict, Verdict::Timeout);
        assert!(outcome.elapsed >= Duration::from_millis(500));
        assert!(outcome.elapsed < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_last_sleep_is_clipped_to_budget() {
        let judge = StatusScript::new(vec![Ok(SubmissionStatus::pending("pending"))]);
        let clock = ManualClock::new();
        let poller = VerdictPoller::new(PollSettings {
            timeout: Duration::from_secs(5),
            interval: Duration::from_secs(2),
            max_query_errors: 10,
        });

        let outcome = poller
            .poll(&judge, &clock, &ProblemRef::new("P1"), &SubmissionId::new("S"))
            .await;

        assert_eq!(outcome.verdict, Verdict::Timeout);
        assert_eq!(outcome.queries, 3);
        assert_eq!(outcome.elapsed, Duration::from_secs(5));
        assert_eq!(clock.slept(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_done_status_details_are_kept() {
        let details = SubmissionDetails {
            compiler_output: Some("error: expected ';'".to_string()),
            ..SubmissionDetails::default()
        };
        let judge = StatusScript::new(vec![Ok(
            SubmissionStatus::done(Some("CE")).with_details(details.clone())
        )]);
        let clock = ManualClock::new();

        let outcome = VerdictPoller::default()
            .poll(&judge, &clock, &ProblemRef::new("P1"), &SubmissionId::new("S"))
            .await;

        assert_eq!(outcome.verdict, Verdict::CompilationError);
        assert_eq!(outcome.details, Some(details));
    }
}
