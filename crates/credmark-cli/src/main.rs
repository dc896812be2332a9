mod cli;
mod commands;
mod error;
mod output;
mod run_id;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

/// Logs go to stderr so stdout carries only the command's JSON output.
/// `RUST_LOG` takes precedence over `--log-level`.
fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let result = commands::run(cli).await?;
    output::render(&result.data, cli.pretty)?;

    if result.has_failures {
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}
