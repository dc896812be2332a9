use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Configuration(#[from] credmark_core::ConfigurationError),

    #[error(transparent)]
    Pipeline(#[from] credmark_core::PipelineError),

    #[error("missing credential: set {name} or pass --{flag}")]
    MissingCredential {
        name: &'static str,
        flag: &'static str,
    },

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_)
            | Self::Pipeline(_)
            | Self::MissingCredential { .. }
            | Self::Command(_) => 2,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use credmark_core::{ConfigurationError, PipelineError, SourceId};

    use super::*;

    #[test]
    fn usage_errors_exit_with_two() {
        let errors = [
            CliError::from(PipelineError::NotRegistered {
                source_id: SourceId::Sec,
            }),
            CliError::Command(String::from("nothing to ingest")),
            CliError::from(ConfigurationError::ZeroMaxAttempts),
            CliError::MissingCredential {
                name: "FRED_API_KEY",
                flag: "fred-api-key",
            },
        ];

        for error in errors {
            assert_eq!(error.exit_code(), 2, "{error}");
        }
    }

    #[test]
    fn io_errors_exit_with_ten() {
        let error = CliError::from(std::io::Error::other("disk full"));

        assert_eq!(error.exit_code(), 10);
    }
}
