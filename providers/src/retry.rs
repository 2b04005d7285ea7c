//! Classification-driven retry scheduling.
//!
//! One logical call is executed as a sequence of attempts. After each failed
//! attempt the [`ErrorClass`] of the failure decides what happens next:
//!
//! | Class | Action |
//! |-------|--------|
//! | `RateLimited` | exponential backoff, up to `max_attempts` failures |
//! | `TokenBudgetExceeded` | double the completion budget and retry at once |
//! | `TransientServer` | short linear retry, up to `transient_retries` |
//! | `Fatal` | stop |
//!
//! # State machine
//!
//! `Idle -> Attempting -> {Success, Backoff -> Attempting, Exhausted, Fatal}`,
//! plus `Canceled` when a caller deadline passes between attempts. Deadlines
//! are never enforced mid-request.
//!
//! # Headers
//!
//! - `X-Retry-Count`: 0 for the first attempt, 1+ for retries
//! - `Idempotency-Key`: `persona-retry-{uuid}`, same across all attempts

use std::future::Future;
use std::time::Duration;

use persona_types::{CompletionTokenBudget, TokenGrowth};
use reqwest::RequestBuilder;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use crate::error::{ErrorClass, RawError, TerminalError};

/// Backoff parameters for one logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Failed rate-limited attempts before giving up (counts the first attempt).
    pub max_attempts: u32,
    /// Delay before the first rate-limit retry; doubled per attempt.
    pub base_delay: Duration,
    /// Upper bound on any single rate-limit delay.
    pub max_delay: Duration,
    /// Seconds added per attempt index on top of the exponential term.
    pub jitter_fraction: f64,
    /// Retries granted to transient server/transport failures.
    pub transient_retries: u32,
    /// Transient delay is `transient_delay * (retry + 1)`.
    pub transient_delay: Duration,
    /// Bounds for completion-budget growth.
    pub token_growth: TokenGrowth,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 1.0,
            transient_retries: 2,
            transient_delay: Duration::from_secs(1),
            token_growth: TokenGrowth::default(),
        }
    }
}

impl RetryPolicy {
    /// Rate-limit delay after the failed attempt with index `attempt` (0-based).
    ///
    /// `min(base * 2^attempt + attempt * jitter, max)`; non-decreasing in `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(62) as i32);
        let linear = f64::from(attempt) * self.jitter_fraction.max(0.0);
        let capped = (exp + linear).min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped.max(0.0))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    #[must_use]
    pub fn transient_delay_for(&self, retry: u32) -> Duration {
        self.transient_delay.saturating_mul(retry.saturating_add(1))
    }
}

/// Loop state. `Idle` is initial; `Success`, `Exhausted`, `Fatal` and
/// `Canceled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempting,
    Backoff(Duration),
    Success,
    Exhausted,
    Fatal,
    Canceled,
}

impl RetryState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            RetryState::Success | RetryState::Exhausted | RetryState::Fatal | RetryState::Canceled
        )
    }
}

/// What the operation sees for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// 0 for the first attempt of the call, then 1, 2, ...
    pub number: u32,
    /// Shared by every attempt of one logical call.
    pub idempotency_key: String,
    /// Completion-token limit to request, when the call carries a budget.
    pub completion_tokens: Option<u32>,
}

impl Attempt {
    /// Add retry headers to a request.
    pub fn apply_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        add_retry_headers(builder, self.number, &self.idempotency_key)
    }
}

/// Per-call options: deadline and growable completion budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallPlan {
    deadline: Option<Instant>,
    budget: Option<CompletionTokenBudget>,
}

impl CallPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// A timeout too large to represent as an instant means no deadline.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Attach a completion budget. Only budgets attached here can grow on
    /// `TokenBudgetExceeded`; without one that class is terminal.
    #[must_use]
    pub fn with_budget(mut self, budget: CompletionTokenBudget) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// Decision taken after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
enum Decision {
    Retry(Duration),
    Grow(CompletionTokenBudget),
    GiveUp(TerminalError),
}

#[derive(Debug, Default)]
struct Progress {
    attempts: u32,
    rate_limited: u32,
    transient: u32,
}

/// Executes logical calls under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds or the failure class says stop.
    pub async fn execute<T, F, Fut>(&self, plan: CallPlan, mut op: F) -> Result<T, TerminalError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
    {
        let idempotency_key = generate_idempotency_key();
        let mut budget = plan.budget;
        let mut progress = Progress::default();
        let mut state = RetryState::Idle;

        loop {
            state = match state {
                RetryState::Idle => RetryState::Attempting,
                RetryState::Attempting => {
                    if deadline_passed(plan.deadline) {
                        tracing::debug!(attempts = progress.attempts, "Retry deadline passed");
                        return Err(TerminalError::Canceled {
                            attempts: progress.attempts,
                        });
                    }

                    let attempt = Attempt {
                        number: progress.attempts,
                        idempotency_key: idempotency_key.clone(),
                        completion_tokens: budget.map(CompletionTokenBudget::current),
                    };
                    progress.attempts += 1;

                    match op(attempt).await {
                        Ok(value) => {
                            tracing::trace!(
                                attempts = progress.attempts,
                                state = ?RetryState::Success,
                                "Call succeeded"
                            );
                            return Ok(value);
                        }
                        Err(error) => match self.decide(&mut progress, budget, &error) {
                            Decision::Retry(delay) => RetryState::Backoff(delay),
                            Decision::Grow(next) => {
                                tracing::debug!(
                                    tokens = next.current(),
                                    doublings = next.doublings(),
                                    "Growing completion budget"
                                );
                                budget = Some(next);
                                RetryState::Attempting
                            }
                            Decision::GiveUp(terminal) => {
                                let end = if terminal.is_fatal() {
                                    RetryState::Fatal
                                } else {
                                    RetryState::Exhausted
                                };
                                tracing::debug!(
                                    attempts = progress.attempts,
                                    state = ?end,
                                    error = %terminal,
                                    "Giving up"
                                );
                                return Err(terminal);
                            }
                        },
                    }
                }
                RetryState::Backoff(delay) => {
                    let wake = Instant::now().checked_add(delay);
                    if let Some(deadline) = plan.deadline
                        && wake.is_none_or(|wake| wake > deadline)
                    {
                        tracing::debug!(
                            attempts = progress.attempts,
                            delay_ms = delay.as_millis(),
                            "Backoff would cross deadline"
                        );
                        return Err(TerminalError::Canceled {
                            attempts: progress.attempts,
                        });
                    }
                    sleep(delay).await;
                    RetryState::Attempting
                }
                RetryState::Success
                | RetryState::Exhausted
                | RetryState::Fatal
                | RetryState::Canceled => {
                    unreachable!("terminal retry states return from the loop")
                }
            };
        }
    }

    fn decide(
        &self,
        progress: &mut Progress,
        budget: Option<CompletionTokenBudget>,
        error: &RawError,
    ) -> Decision {
        let class = error.class();
        match class {
            ErrorClass::RateLimited => {
                let failed = progress.rate_limited;
                progress.rate_limited += 1;
                if progress.rate_limited >= self.policy.max_attempts {
                    return Decision::GiveUp(TerminalError::Exhausted {
                        class,
                        attempts: progress.rate_limited,
                        message: error.message().to_string(),
                    });
                }
                let delay = self.policy.delay_for(failed);
                tracing::debug!(
                    %class,
                    attempt = progress.rate_limited,
                    delay_ms = delay.as_millis(),
                    "Rate limited, backing off"
                );
                Decision::Retry(delay)
            }
            ErrorClass::TokenBudgetExceeded => match budget.and_then(CompletionTokenBudget::grow) {
                Some(next) => Decision::Grow(next),
                None => Decision::GiveUp(TerminalError::Exhausted {
                    class,
                    attempts: progress.attempts,
                    message: error.message().to_string(),
                }),
            },
            ErrorClass::TransientServer => {
                if progress.transient >= self.policy.transient_retries {
                    return Decision::GiveUp(TerminalError::Exhausted {
                        class,
                        attempts: progress.attempts,
                        message: error.message().to_string(),
                    });
                }
                let delay = self.policy.transient_delay_for(progress.transient);
                progress.transient += 1;
                tracing::debug!(
                    %class,
                    attempt = progress.transient,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "Transient failure, retrying"
                );
                Decision::Retry(delay)
            }
            ErrorClass::Fatal => Decision::GiveUp(TerminalError::Fatal {
                message: error.message().to_string(),
            }),
        }
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Add retry-related headers to a request.
///
/// - `retry_count`: 0 for initial request, 1+ for retries
/// - `idempotency_key`: same UUID across all attempts
pub fn add_retry_headers(
    builder: RequestBuilder,
    retry_count: u32,
    idempotency_key: &str,
) -> RequestBuilder {
    builder
        .header("X-Retry-Count", retry_count.to_string())
        .header("Idempotency-Key", idempotency_key)
}

#[must_use]
pub fn generate_idempotency_key() -> String {
    format!("persona-retry-{}", Uuid::new_v4())
}
