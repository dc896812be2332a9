//! Bounded re-execution with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{Classify, ConfigurationError, FailureKind};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed {
        delay: Duration,
    },
    /// `base * factor ^ attempt_index`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        /// Spread each delay uniformly over +/- 50%.
        jitter: bool,
    },
}

impl Backoff {
    /// Doubling delays starting at `base`, uncapped and without jitter.
    pub const fn doubling(base: Duration) -> Self {
        Self::Exponential {
            base,
            factor: 2.0,
            max: Duration::MAX,
            jitter: false,
        }
    }

    /// Delay to wait after the attempt at `attempt` (0-based) failed.
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let delay = Duration::try_from_secs_f64(seconds).unwrap_or(max);

                if jitter {
                    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    let half = millis / 2;
                    let offset = fastrand::u64(0..=half * 2);
                    Duration::from_millis(millis.saturating_sub(half).saturating_add(offset))
                } else {
                    delay
                }
            }
        }
    }
}

/// Stateless retry policy applied around one unit of work.
///
/// Failures whose [`FailureKind`] is in `retry_on` are retried until
/// `max_attempts` is reached; anything else propagates immediately.
/// [`FailureKind::BreakerOpen`] is never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    retry_on: Vec<FailureKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::doubling(Duration::from_secs(1)),
            retry_on: vec![FailureKind::Transient],
        }
    }
}

impl RetryPolicy {
    /// Exponential policy: `base_delay * 2^attempt_index` between attempts.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Result<Self, ConfigurationError> {
        Self::with_backoff(max_attempts, Backoff::doubling(base_delay))
    }

    pub fn with_backoff(max_attempts: u32, backoff: Backoff) -> Result<Self, ConfigurationError> {
        if max_attempts == 0 {
            return Err(ConfigurationError::ZeroMaxAttempts);
        }
        Ok(Self {
            max_attempts,
            backoff,
            ..Self::default()
        })
    }

    /// Replaces the set of retryable failure kinds.
    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.retry_on = kinds.into_iter().collect();
        self
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub const fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn should_retry(&self, kind: FailureKind) -> bool {
        kind != FailureKind::BreakerOpen && self.retry_on.contains(&kind)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable kind, or
    /// exhausts `max_attempts`. The last error is returned unchanged.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt = 0;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let kind = error.failure_kind();
            if !self.should_retry(kind) {
                debug!(kind = kind.as_str(), %error, "failure is not retryable");
                return Err(error);
            }
            if attempt + 1 >= self.max_attempts {
                error!(attempts = self.max_attempts, %error, "giving up after final attempt");
                return Err(error);
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %error,
                "attempt failed; retrying"
            );
            drop(error);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
