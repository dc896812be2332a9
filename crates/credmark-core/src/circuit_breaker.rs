use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{BreakerOpenError, CallError, Classify, ConfigurationError, FailureKind};

/// Runtime circuit state for one remote dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures that trip a closed breaker.
    pub failure_threshold: u32,
    /// Time spent open before a trial call is admitted.
    pub recovery_timeout: Duration,
    /// Failure kinds that count toward the threshold. Other failures still
    /// propagate to the caller but leave the breaker untouched.
    pub counted_kinds: Vec<FailureKind>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            counted_kinds: FailureKind::ALL.to_vec(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            ..Self::default()
        }
    }

    pub fn counting(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.counted_kinds = kinds.into_iter().collect();
        self
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigurationError> {
        if self.failure_threshold == 0 {
            return Err(ConfigurationError::ZeroFailureThreshold {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    fn counts(&self, kind: FailureKind) -> bool {
        self.counted_kinds.contains(&kind)
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

impl CircuitInner {
    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.probe_in_flight = false;
    }
}

/// How a call got past the breaker. Outcomes are only applied when they
/// still match the state the call was admitted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Closed,
    Probe,
}

/// Thread-safe circuit breaker guarding calls to one remote dependency.
///
/// The `Open -> HalfOpen` transition is evaluated lazily when a call arrives;
/// there is no background timer.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        config.validate(&name)?;
        Ok(Self {
            name,
            config,
            inner: Mutex::new(CircuitInner::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Runs `work` unless the breaker is open, recording its outcome.
    ///
    /// The work's error is returned unchanged inside [`CallError::Failed`];
    /// rejections surface as [`CallError::Open`] without invoking `work`.
    pub async fn call<F, Fut, T, E>(&self, work: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let admission = self.admit()?;
        let mut probe = ProbeSlot::new(self, admission);

        let outcome = work().await;
        probe.settle();

        match &outcome {
            Ok(_) => self.record_success(admission),
            Err(error) => self.record_failure(admission, error.failure_kind()),
        }
        outcome.map_err(CallError::Failed)
    }

    fn admit(&self) -> Result<Admission, BreakerOpenError> {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");

        match inner.state {
            CircuitState::Closed => Ok(Admission::Closed),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(self.config.recovery_timeout, |opened_at| opened_at.elapsed());

                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(breaker = %self.name, "circuit half-open; admitting trial call");
                    Ok(Admission::Probe)
                } else {
                    let remaining = self.config.recovery_timeout - elapsed;
                    debug!(
                        breaker = %self.name,
                        remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                        "circuit open; rejecting call"
                    );
                    Err(BreakerOpenError::new(&self.name, remaining))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    debug!(breaker = %self.name, "trial call in flight; rejecting call");
                    Err(BreakerOpenError::new(&self.name, Duration::ZERO))
                } else {
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");

        match (admission, inner.state) {
            (Admission::Probe, CircuitState::HalfOpen) => {
                inner.close();
                info!(breaker = %self.name, "trial call succeeded; circuit closed");
            }
            (Admission::Closed, CircuitState::Closed) => inner.consecutive_failures = 0,
            // Late result of a call admitted before the state moved on.
            _ => {}
        }
    }

    fn record_failure(&self, admission: Admission, kind: FailureKind) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");

        if !self.config.counts(kind) {
            if admission == Admission::Probe && inner.state == CircuitState::HalfOpen {
                inner.probe_in_flight = false;
            }
            return;
        }

        match (admission, inner.state) {
            (Admission::Probe, CircuitState::HalfOpen) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.trip(Instant::now());
                warn!(
                    breaker = %self.name,
                    kind = kind.as_str(),
                    "trial call failed; circuit reopened"
                );
            }
            (Admission::Closed, CircuitState::Closed) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.trip(Instant::now());
                    let cooldown_ms = self.config.recovery_timeout.as_millis();
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        recovery_timeout_ms = u64::try_from(cooldown_ms).unwrap_or(u64::MAX),
                        "failure threshold reached; circuit opened"
                    );
                }
            }
            _ => {}
        }
    }

    /// Forces the breaker closed and clears the failure counter.
    pub fn reset(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.close();
        info!(breaker = %self.name, "circuit manually reset");
    }

    pub fn state(&self) -> CircuitState {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.consecutive_failures
    }

    /// Cooldown left while open; zero in any other state.
    pub fn time_remaining(&self) -> Duration {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => self
                .config
                .recovery_timeout
                .saturating_sub(opened_at.elapsed()),
            _ => Duration::ZERO,
        }
    }
}

/// Frees the half-open trial slot if the trial future is dropped before it
/// reports an outcome, so a cancelled probe cannot wedge the breaker.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    held: bool,
}

impl<'a> ProbeSlot<'a> {
    fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            held: admission == Admission::Probe,
        }
    }

    fn settle(&mut self) {
        self.held = false;
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        if let Ok(mut inner) = self.breaker.inner.lock() {
            if inner.state == CircuitState::HalfOpen {
                inner.probe_in_flight = false;
            }
        }
    }
}
