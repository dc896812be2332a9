//! Explicit composition of the resilience layers.
//!
//! A [`Work`] value is a no-argument unit of work that can be invoked any
//! number of times. Wrappers add one layer each and are themselves [`Work`],
//! so a stack is built once and then called repeatedly:
//!
//! ```rust,ignore
//! let fetch = work_fn(move || client.clone().series_observations("GDP"))
//!     .with_retry(RetryPolicy::new(3, Duration::from_secs(1))?)
//!     .with_breaker(Arc::clone(&breaker))
//!     .with_rate_limit(Arc::clone(&limiter));
//!
//! let payload = fetch.call().await?;
//! ```
//!
//! Wrapping order decides what each layer observes: a retry wrapped by a
//! breaker reports only the exhausted outcome to the breaker, while a
//! breaker wrapped by a retry counts every attempt.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{CallError, Classify};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

pub type WorkFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Repeatable async unit of work.
pub trait Work: Send + Sync {
    type Output: Send;
    type Error: Send;

    fn call(&self) -> WorkFuture<'_, Self::Output, Self::Error>;
}

/// [`Work`] backed by a closure returning a fresh future per call.
#[derive(Debug, Clone)]
pub struct WorkFn<F> {
    operation: F,
}

pub fn work_fn<F, Fut, T, E>(operation: F) -> WorkFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    WorkFn { operation }
}

impl<F, Fut, T, E> Work for WorkFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send,
    E: Send,
{
    type Output = T;
    type Error = E;

    fn call(&self) -> WorkFuture<'_, T, E> {
        Box::pin((self.operation)())
    }
}

/// Re-runs the inner work according to a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Retrying<W> {
    inner: W,
    policy: RetryPolicy,
}

impl<W> Work for Retrying<W>
where
    W: Work,
    W::Error: Classify + Display,
{
    type Output = W::Output;
    type Error = W::Error;

    fn call(&self) -> WorkFuture<'_, W::Output, W::Error> {
        Box::pin(self.policy.run(|| self.inner.call()))
    }
}

/// Runs the inner work behind a shared [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct Guarded<W> {
    inner: W,
    breaker: Arc<CircuitBreaker>,
}

impl<W> Guarded<W> {
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl<W> Work for Guarded<W>
where
    W: Work,
    W::Error: Classify,
{
    type Output = W::Output;
    type Error = CallError<W::Error>;

    fn call(&self) -> WorkFuture<'_, W::Output, CallError<W::Error>> {
        Box::pin(self.breaker.call(|| self.inner.call()))
    }
}

/// Waits for a token from a shared [`RateLimiter`] before every call.
#[derive(Debug, Clone)]
pub struct Throttled<W> {
    inner: W,
    limiter: Arc<RateLimiter>,
}

impl<W: Work> Work for Throttled<W> {
    type Output = W::Output;
    type Error = W::Error;

    fn call(&self) -> WorkFuture<'_, W::Output, W::Error> {
        Box::pin(self.limiter.run(|| self.inner.call()))
    }
}

/// Builder methods available on every [`Work`].
pub trait WorkExt: Work + Sized {
    fn with_retry(self, policy: RetryPolicy) -> Retrying<Self> {
        Retrying {
            inner: self,
            policy,
        }
    }

    fn with_breaker(self, breaker: Arc<CircuitBreaker>) -> Guarded<Self> {
        Guarded {
            inner: self,
            breaker,
        }
    }

    fn with_rate_limit(self, limiter: Arc<RateLimiter>) -> Throttled<Self> {
        Throttled {
            inner: self,
            limiter,
        }
    }
}

impl<W: Work> WorkExt for W {}
