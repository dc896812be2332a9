use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Classify, FailureKind, ValidationError};

/// Remote dependency identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// FRED series observations.
    Fred,
    /// SEC EDGAR company submissions.
    Sec,
}

impl SourceId {
    pub const ALL: [Self; 2] = [Self::Fred, Self::Sec];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fred => "fred",
            Self::Sec => "sec",
        }
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fred" => Ok(Self::Fred),
            "sec" => Ok(Self::Sec),
            _ => Err(ValidationError::InvalidSource {
                value: value.to_owned(),
            }),
        }
    }
}

/// Source failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    InvalidRequest,
    Rejected,
    Decode,
    BreakerOpen,
    Archive,
}

/// Failure of one source fetch, carried through retry and breaker layers.
///
/// Messages never contain request URLs, so credentials passed as query
/// parameters stay out of logs and reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Rejected,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Decode,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn breaker_open(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::BreakerOpen,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn archive(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Archive,
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps a non-success HTTP status: 408, 429 and 5xx are transient,
    /// anything else is a permanent rejection.
    pub fn from_status(source: SourceId, status: u16) -> Self {
        match status {
            429 => Self::rate_limited(format!("{source} responded with HTTP 429")),
            408 | 500..=599 => Self::unavailable(format!("{source} responded with HTTP {status}")),
            _ => Self::rejected(format!("{source} responded with HTTP {status}")),
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::Rejected => "source.rejected",
            SourceErrorKind::Decode => "source.decode",
            SourceErrorKind::BreakerOpen => "source.breaker_open",
            SourceErrorKind::Archive => "source.archive",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

impl Classify for SourceError {
    fn failure_kind(&self) -> FailureKind {
        if self.kind == SourceErrorKind::BreakerOpen {
            FailureKind::BreakerOpen
        } else if self.retryable {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }
}

impl From<ValidationError> for SourceError {
    fn from(error: ValidationError) -> Self {
        Self::invalid_request(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_ids_case_insensitively() {
        assert_eq!("FRED".parse::<SourceId>(), Ok(SourceId::Fred));
        assert_eq!(" sec ".parse::<SourceId>(), Ok(SourceId::Sec));
        assert_eq!(
            "edgar".parse::<SourceId>(),
            Err(ValidationError::InvalidSource {
                value: String::from("edgar"),
            })
        );
    }

    #[test]
    fn status_classification() {
        let cases = [
            (408, FailureKind::Transient),
            (429, FailureKind::Transient),
            (500, FailureKind::Transient),
            (503, FailureKind::Transient),
            (400, FailureKind::Permanent),
            (403, FailureKind::Permanent),
            (404, FailureKind::Permanent),
        ];

        for (status, expected) in cases {
            let error = SourceError::from_status(SourceId::Fred, status);
            assert_eq!(error.failure_kind(), expected, "status {status}");
        }
        assert_eq!(
            SourceError::from_status(SourceId::Sec, 429).kind(),
            SourceErrorKind::RateLimited
        );
    }

    #[test]
    fn breaker_rejections_keep_their_own_kind() {
        let error = SourceError::breaker_open("circuit breaker 'fred' is OPEN");

        assert_eq!(error.failure_kind(), FailureKind::BreakerOpen);
        assert_eq!(error.code(), "source.breaker_open");
    }
}
