use credmark_core::{DependencyPolicy, PolicyOverrides, SourceId};

use crate::cli::PolicyCommandArgs;
use crate::error::CliError;

use super::CommandResult;

pub fn run(
    args: &PolicyCommandArgs,
    overrides: &PolicyOverrides,
) -> Result<CommandResult, CliError> {
    let sources = match args.source {
        Some(source) => vec![source],
        None => SourceId::ALL.to_vec(),
    };

    let policies = sources
        .into_iter()
        .map(|source| overrides.apply(DependencyPolicy::default_for(source)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CommandResult::ok(serde_json::to_value(policies)?))
}
