mod ingest;
mod policy;

use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Rendered command output plus whether the exit code should flag failures.
pub struct CommandResult {
    pub data: Value,
    pub has_failures: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            has_failures: false,
        }
    }

    pub fn with_failures(mut self, has_failures: bool) -> Self {
        self.has_failures = has_failures;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let overrides = cli.policy.overrides();

    match &cli.command {
        Command::Ingest(args) => ingest::run(args, &overrides).await,
        Command::Policy(args) => policy::run(args, &overrides),
    }
}
