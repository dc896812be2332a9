use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ConfigurationError;
use crate::executor::ExecutorConfig;
use crate::rate_limiter::RateLimit;
use crate::retry::RetryPolicy;
use crate::source::SourceId;

/// Resilience settings for one remote dependency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyPolicy {
    pub source: SourceId,
    pub max_workers: usize,
    /// Requests per second across all workers.
    pub rate: f64,
    pub burst: u32,
    pub failure_threshold: u32,
    #[serde(rename = "recovery_timeout_ms", serialize_with = "as_millis")]
    pub recovery_timeout: Duration,
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", serialize_with = "as_millis")]
    pub base_delay: Duration,
}

impl DependencyPolicy {
    pub fn fred_default() -> Self {
        Self {
            source: SourceId::Fred,
            max_workers: 4,
            rate: 5.0,
            burst: 5,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }

    /// EDGAR's fair-access ceiling is 10 requests per second.
    pub fn sec_default() -> Self {
        Self {
            source: SourceId::Sec,
            max_workers: 4,
            rate: 10.0,
            burst: 1,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn default_for(source: SourceId) -> Self {
        match source {
            SourceId::Fred => Self::fred_default(),
            SourceId::Sec => Self::sec_default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let name = self.source.as_str();
        self.breaker_config().validate(name)?;
        self.executor_config().validate(name)?;
        self.retry_policy().map(|_| ())
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(self.failure_threshold, self.recovery_timeout)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigurationError> {
        RetryPolicy::new(self.max_attempts, self.base_delay)
    }

    pub const fn rate_limit(&self) -> RateLimit {
        RateLimit::new(self.rate, self.burst)
    }

    pub const fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::new(self.max_workers, self.rate_limit())
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Field-by-field overrides, typically from command-line flags. Durations
/// are given in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyOverrides {
    pub max_workers: Option<usize>,
    pub rate: Option<f64>,
    pub burst: Option<u32>,
    pub max_attempts: Option<u32>,
    pub base_delay_secs: Option<f64>,
    pub failure_threshold: Option<u32>,
    pub recovery_timeout_secs: Option<f64>,
}

impl PolicyOverrides {
    /// Applies the set fields on top of `policy` and validates the result.
    pub fn apply(
        &self,
        mut policy: DependencyPolicy,
    ) -> Result<DependencyPolicy, ConfigurationError> {
        if let Some(max_workers) = self.max_workers {
            policy.max_workers = max_workers;
        }
        if let Some(rate) = self.rate {
            policy.rate = rate;
        }
        if let Some(burst) = self.burst {
            policy.burst = burst;
        }
        if let Some(max_attempts) = self.max_attempts {
            policy.max_attempts = max_attempts;
        }
        if let Some(seconds) = self.base_delay_secs {
            policy.base_delay = duration_from_secs("base_delay", seconds)?;
        }
        if let Some(failure_threshold) = self.failure_threshold {
            policy.failure_threshold = failure_threshold;
        }
        if let Some(seconds) = self.recovery_timeout_secs {
            policy.recovery_timeout = duration_from_secs("recovery_timeout", seconds)?;
        }

        policy.validate()?;
        Ok(policy)
    }
}

fn duration_from_secs(field: &'static str, seconds: f64) -> Result<Duration, ConfigurationError> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| ConfigurationError::InvalidDuration { field, value: seconds })
}
