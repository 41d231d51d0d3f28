//! Retry with exponential backoff for compensating commands.
//!
//! Only [`DispatchError::Transient`] failures are retried. A rejection
//! ends the run at once. Every attempt reuses the caller's request ID, so
//! a command that actually arrived before its acknowledgement was lost is
//! recognised downstream as a replay.
//!
//! ```rust,ignore
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .initial_backoff(Duration::from_millis(500))
//!     .max_backoff(Duration::from_secs(5))
//!     .build();
//!
//! let report = policy
//!     .execute(cmd.request_id, Step::CancelOrder, |_attempt| bus.dispatch(cmd.clone().into()))
//!     .await;
//! ```

use std::future::Future;
use std::time::Duration;

use contracts::{RequestId, Step};
use rand::Rng;
use tokio::time::sleep;

use crate::bus::DispatchError;

/// Retry policy configuration.
///
/// # Default Values
///
/// - `max_attempts`: 3 (including the first)
/// - `initial_backoff`: 500ms
/// - `max_backoff`: 5 seconds
/// - `multiplier`: 2.0
/// - `jitter`: on, scaling each delay by a factor in [0.5, 1.0]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Delay to wait after attempt `attempt` (1-based) failed.
    ///
    /// `min(initial * multiplier^(attempt - 1), max)`, scaled by jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_secs_f64()).max(0.0);

        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };

        Duration::from_nanos((capped * factor * 1e9).round() as u64)
    }

    /// Runs `action` until it succeeds, is rejected, or the attempt budget
    /// is spent. `action` receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(
        &self,
        request_id: RequestId,
        step: Step,
        mut action: F,
    ) -> RetryReport<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match action(attempt).await {
                Ok(value) => {
                    attempts.push(AttemptRecord::succeeded(attempt));
                    metrics::counter!(
                        "compensation_attempts_total",
                        "step" => step.as_str(),
                        "outcome" => "success"
                    )
                    .increment(1);
                    if attempt > 1 {
                        tracing::info!(%request_id, %step, attempt, "succeeded after retry");
                    }
                    return RetryReport {
                        outcome: RetryOutcome::Success(value),
                        attempts,
                    };
                }
                Err(DispatchError::Rejected(reason)) => {
                    attempts.push(AttemptRecord::failed(attempt, &reason, None));
                    metrics::counter!(
                        "compensation_attempts_total",
                        "step" => step.as_str(),
                        "outcome" => "rejected"
                    )
                    .increment(1);
                    tracing::error!(%request_id, %step, attempt, %reason, "command rejected, not retrying");
                    return RetryReport {
                        outcome: RetryOutcome::Rejected { reason },
                        attempts,
                    };
                }
                Err(DispatchError::Transient(error)) if attempt >= max_attempts => {
                    attempts.push(AttemptRecord::failed(attempt, &error, None));
                    metrics::counter!(
                        "compensation_attempts_total",
                        "step" => step.as_str(),
                        "outcome" => "exhausted"
                    )
                    .increment(1);
                    tracing::error!(%request_id, %step, attempt, %error, "retry budget exhausted");
                    return RetryReport {
                        outcome: RetryOutcome::ExhaustedRetries { last_error: error },
                        attempts,
                    };
                }
                Err(DispatchError::Transient(error)) => {
                    let delay = self.delay_for_attempt(attempt);
                    attempts.push(AttemptRecord::failed(attempt, &error, Some(delay)));
                    metrics::counter!(
                        "compensation_attempts_total",
                        "step" => step.as_str(),
                        "outcome" => "retry"
                    )
                    .increment(1);
                    tracing::warn!(
                        %request_id,
                        %step,
                        attempt,
                        %error,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: bool,
}

impl RetryPolicyBuilder {
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    #[must_use]
    pub const fn max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// How a retried command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Success(T),
    ExhaustedRetries { last_error: String },
    Rejected { reason: String },
}

/// One delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error: Option<String>,
    /// Delay slept before the next attempt.
    pub backoff: Option<Duration>,
}

impl AttemptRecord {
    fn succeeded(attempt: u32) -> Self {
        Self {
            attempt,
            error: None,
            backoff: None,
        }
    }

    fn failed(attempt: u32, error: &str, backoff: Option<Duration>) -> Self {
        Self {
            attempt,
            error: Some(error.to_string()),
            backoff,
        }
    }
}

/// Outcome plus the full attempt log, for the saga's audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryReport<T> {
    pub outcome: RetryOutcome<T>,
    pub attempts: Vec<AttemptRecord>,
}

impl<T> RetryReport<T> {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RetryOutcome::Success(_))
    }
}
