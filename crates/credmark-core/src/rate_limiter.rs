//! Token-bucket rate limiter shared by every caller of one remote dependency.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use crate::error::ConfigurationError;

/// Refills that land a few nanoseconds short of a whole token still count as
/// one, since `Duration` rounds `1 / rate` to whole nanoseconds.
const TOKEN_EPSILON: f64 = 1e-6;

/// Refill rate and burst capacity of a token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimit {
    /// Tokens added per second.
    pub rate: f64,
    /// Bucket capacity; the largest burst allowed after an idle period.
    pub burst: u32,
}

impl RateLimit {
    pub const fn new(rate: f64, burst: u32) -> Self {
        Self { rate, burst }
    }

    /// Evenly spaced calls with no burst allowance.
    pub const fn per_second(rate: f64) -> Self {
        Self::new(rate, 1)
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigurationError> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(ConfigurationError::NonPositiveRate {
                name: name.to_owned(),
                rate: self.rate,
            });
        }
        if self.burst == 0 {
            return Err(ConfigurationError::ZeroBurst {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    fn capacity(self) -> f64 {
        f64::from(self.burst)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, limit: RateLimit) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * limit.rate).min(limit.capacity());
        self.last_refill = now;
    }
}

/// Thread-safe token bucket.
///
/// The bucket starts full. Refill and consumption happen in a single critical
/// section so concurrent callers never credit the same elapsed time twice.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    limit: RateLimit,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, limit: RateLimit) -> Result<Self, ConfigurationError> {
        let name = name.into();
        limit.validate(&name)?;
        Ok(Self::from_validated(name, limit))
    }

    pub(crate) fn from_validated(name: String, limit: RateLimit) -> Self {
        Self {
            name,
            limit,
            bucket: Mutex::new(Bucket {
                tokens: limit.capacity(),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Tokens currently in the bucket, after crediting elapsed time.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self
            .bucket
            .lock()
            .expect("rate limiter lock is not poisoned");
        bucket.refill(Instant::now(), self.limit);
        bucket.tokens
    }

    /// Takes one token, or reports how long until one is available.
    fn take(&self) -> Result<(), Duration> {
        let mut bucket = self
            .bucket
            .lock()
            .expect("rate limiter lock is not poisoned");
        bucket.refill(Instant::now(), self.limit);

        if bucket.tokens + TOKEN_EPSILON >= 1.0 {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
            Ok(())
        } else {
            let wait = (1.0 - bucket.tokens) / self.limit.rate;
            Err(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX))
        }
    }

    /// Non-blocking acquisition.
    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Acquires one token.
    ///
    /// Without `blocking` this returns `false` as soon as the bucket is empty.
    /// With `blocking` it sleeps until a token is available and always returns
    /// `true`; there is no upper bound on the wait, so callers needing one
    /// should wrap the future in a timeout.
    pub async fn acquire(&self, blocking: bool) -> bool {
        loop {
            match self.take() {
                Ok(()) => return true,
                Err(_) if !blocking => return false,
                Err(wait) => {
                    trace!(
                        limiter = %self.name,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "waiting for rate limit token"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Waits for a token, then runs `operation`.
    pub async fn run<F, Fut>(&self, operation: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.acquire(true).await;
        operation().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_rate_and_zero_burst() {
        assert_eq!(
            RateLimiter::new("fred", RateLimit::new(0.0, 5)).unwrap_err(),
            ConfigurationError::NonPositiveRate {
                name: String::from("fred"),
                rate: 0.0,
            }
        );
        assert!(RateLimiter::new("fred", RateLimit::new(f64::NAN, 5)).is_err());
        assert!(RateLimiter::new("fred", RateLimit::new(-1.0, 5)).is_err());
        assert_eq!(
            RateLimiter::new("fred", RateLimit::new(5.0, 0)).unwrap_err(),
            ConfigurationError::ZeroBurst {
                name: String::from("fred"),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn allows_burst_then_rejects() {
        let limiter = RateLimiter::new("test", RateLimit::new(1.0, 5)).expect("valid limit");

        for _ in 0..5 {
            assert!(limiter.acquire(false).await);
        }
        assert!(!limiter.acquire(false).await);
    }

    #[tokio::test(start_paused = true)]
    async fn refills_one_token_per_interval() {
        let limiter = RateLimiter::new("test", RateLimit::new(4.0, 2)).expect("valid limit");
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(250)).await;

        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_capacity_after_idling() {
        let limiter = RateLimiter::new("test", RateLimit::new(100.0, 3)).expect("valid limit");

        tokio::time::advance(Duration::from_secs(10)).await;

        assert!((limiter.available_tokens() - 3.0).abs() < f64::EPSILON);
        for _ in 0..3 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_rate_reports_an_empty_bucket_instead_of_panicking() {
        let limiter = RateLimiter::new("test", RateLimit::new(1e-20, 1)).expect("valid limit");

        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(!limiter.acquire(false).await);
        assert!(limiter.available_tokens() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_acquire_waits_for_refill() {
        let limiter = RateLimiter::new("test", RateLimit::new(10.0, 1)).expect("valid limit");
        assert!(limiter.try_acquire());

        let start = Instant::now();
        assert!(limiter.acquire(true).await);

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(limiter.available_tokens() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_gates_each_invocation() {
        let limiter = RateLimiter::new("test", RateLimit::new(100.0, 2)).expect("valid limit");
        let start = Instant::now();

        let first = limiter.run(|| async { 1 }).await;
        let second = limiter.run(|| async { 2 }).await;
        assert_eq!((first, second), (1, 2));
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.run(|| async {}).await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
