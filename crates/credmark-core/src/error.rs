use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Invalid resilience parameters. Raised when a component is constructed,
/// never while a call is in flight.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("rate limiter '{name}': rate must be a positive finite number, got {rate}")]
    NonPositiveRate { name: String, rate: f64 },
    #[error("rate limiter '{name}': burst capacity must be at least 1")]
    ZeroBurst { name: String },
    #[error("circuit breaker '{name}': failure_threshold must be at least 1")]
    ZeroFailureThreshold { name: String },
    #[error("retry policy: max_attempts must be at least 1")]
    ZeroMaxAttempts,
    #[error("executor '{name}': max_workers must be at least 1")]
    ZeroWorkers { name: String },
    #[error("field '{field}' must be a non-negative finite number of seconds, got {value}")]
    InvalidDuration { field: &'static str, value: f64 },
}

/// Input validation errors for identifiers handed to the source clients.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid source '{value}', expected one of fred, sec")]
    InvalidSource { value: String },
    #[error("series id cannot be empty")]
    EmptySeriesId,
    #[error("series id '{value}' may only contain ASCII letters, digits and '_'")]
    InvalidSeriesId { value: String },
    #[error("cik '{value}' must be 1 to 10 ASCII digits")]
    InvalidCik { value: String },
    #[error("date '{value}' must be formatted as YYYY-MM-DD")]
    InvalidDate { value: String },
}

/// Failure classes understood by the retry policy and the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worth another attempt: timeouts, connection resets, 429 and 5xx.
    Transient,
    /// Retrying cannot help, but the dependency may still be unhealthy.
    Permanent,
    /// Synthesized by an open circuit breaker. Never retried.
    BreakerOpen,
}

impl FailureKind {
    pub const ALL: [Self; 3] = [Self::Transient, Self::Permanent, Self::BreakerOpen];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::BreakerOpen => "breaker_open",
        }
    }
}

/// Maps an error value onto a [`FailureKind`].
///
/// Implemented by every error type that flows through [`crate::RetryPolicy`]
/// or [`crate::CircuitBreaker`].
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;
}

/// Rejection raised by a circuit breaker that refused to run the wrapped work.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("circuit breaker '{name}' is OPEN; retry in {remaining:?}")]
pub struct BreakerOpenError {
    name: String,
    remaining: Duration,
}

impl BreakerOpenError {
    pub(crate) fn new(name: impl Into<String>, remaining: Duration) -> Self {
        Self {
            name: name.into(),
            remaining,
        }
    }

    pub fn breaker(&self) -> &str {
        &self.name
    }

    /// Cooldown left before the breaker admits a trial call. Zero while another
    /// caller holds the half-open trial slot.
    pub const fn time_remaining(&self) -> Duration {
        self.remaining
    }
}

impl Classify for BreakerOpenError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::BreakerOpen
    }
}

/// Outcome error of a breaker-guarded call.
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error(transparent)]
    Open(#[from] BreakerOpenError),
    /// The wrapped work ran and failed; the error is passed through untouched.
    #[error(transparent)]
    Failed(E),
}

impl<E> CallError<E> {
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    pub fn open_error(&self) -> Option<&BreakerOpenError> {
        match self {
            Self::Open(error) => Some(error),
            Self::Failed(_) => None,
        }
    }

    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Open(_) => None,
            Self::Failed(error) => Some(error),
        }
    }
}

impl<E: Classify> Classify for CallError<E> {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Open(_) => FailureKind::BreakerOpen,
            Self::Failed(error) => error.failure_kind(),
        }
    }
}

/// Per-item failure captured by the concurrent executor.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    #[error(transparent)]
    Failed(E),
    #[error("work function panicked: {0}")]
    Panicked(String),
}

impl<E> TaskError<E> {
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Panicked(_) => None,
        }
    }
}

impl<E: Classify> Classify for TaskError<E> {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Failed(error) => error.failure_kind(),
            Self::Panicked(_) => FailureKind::Permanent,
        }
    }
}
