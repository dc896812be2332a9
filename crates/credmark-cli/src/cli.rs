//! CLI argument definitions for credmark.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ingest` | Fetch and archive FRED series and SEC submissions for a date |
//! | `policy` | Print the effective resilience policy per source |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-level` | `info` | Log filter, overridden by `RUST_LOG` |
//! | `--log-json` | `false` | Emit logs as JSON lines on stderr |
//! | `--max-workers`, `--rate`, `--burst` | per source | Concurrency and request budget |
//! | `--max-attempts`, `--base-delay` | per source | Retry policy |
//! | `--failure-threshold`, `--recovery-timeout` | per source | Circuit breaker |
//!
//! # Examples
//!
//! ```bash
//! credmark ingest --date 2024-01-02 --fred DGS10,BAMLH0A0HYM2 --sec 320193
//! credmark ingest --fred DGS10 --dry-run --pretty
//! credmark policy --source sec --rate 5
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use credmark_core::{PolicyOverrides, SourceId, ValidationError};
use time::macros::format_description;
use time::Date;

#[derive(Debug, Parser)]
#[command(
    name = "credmark",
    author,
    version,
    about = "Resilient daily ingestion of FRED and SEC EDGAR data",
    long_about = "credmark fetches FRED series observations and SEC EDGAR company submissions \
through a rate-limited worker pool guarded by a circuit breaker and a retry policy per source, \
and archives the raw JSON payloads by date.\n\
\n\
Use 'credmark <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log filter directive (e.g. `debug`, `credmark_core=trace`).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(flatten)]
    pub policy: PolicyArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides applied on top of each source's default policy.
#[derive(Debug, Clone, Default, Args)]
pub struct PolicyArgs {
    /// Worker pool size per source.
    #[arg(long, global = true)]
    pub max_workers: Option<usize>,

    /// Requests per second per source, shared by all workers.
    #[arg(long, global = true)]
    pub rate: Option<f64>,

    /// Token bucket capacity.
    #[arg(long, global = true)]
    pub burst: Option<u32>,

    /// Attempts per item, including the first.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Seconds before the first retry; doubles on each further retry.
    #[arg(long, global = true)]
    pub base_delay: Option<f64>,

    /// Consecutive failures that open a source's circuit breaker.
    #[arg(long, global = true)]
    pub failure_threshold: Option<u32>,

    /// Seconds an open breaker waits before admitting a trial call.
    #[arg(long, global = true)]
    pub recovery_timeout: Option<f64>,
}

impl PolicyArgs {
    pub fn overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            max_workers: self.max_workers,
            rate: self.rate,
            burst: self.burst,
            max_attempts: self.max_attempts,
            base_delay_secs: self.base_delay,
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch and archive payloads for one date.
    ///
    /// Exits with code 3 when any item failed; the report still lists every
    /// item.
    ///
    /// # Examples
    ///
    ///   credmark ingest --date 2024-01-02 --fred DGS10 --sec 320193
    ///   credmark ingest --fred DGS10,DGS2 --archive-dir /var/lib/credmark
    Ingest(IngestArgs),

    /// Print the effective policy for one or all sources.
    Policy(PolicyCommandArgs),
}

#[derive(Debug, Clone, Args)]
pub struct IngestArgs {
    /// Partition date (YYYY-MM-DD). Defaults to today in UTC.
    #[arg(long, alias = "target-date", value_parser = parse_date)]
    pub date: Option<Date>,

    /// FRED series ids, comma separated or repeated.
    #[arg(long, value_delimiter = ',')]
    pub fred: Vec<String>,

    /// SEC CIKs, comma separated or repeated.
    #[arg(long, value_delimiter = ',')]
    pub sec: Vec<String>,

    /// Root directory of the raw payload archive.
    #[arg(long, env = "CREDMARK_ARCHIVE_DIR", default_value = "data")]
    pub archive_dir: PathBuf,

    /// Use an offline transport and skip archiving.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(long, env = "FRED_API_KEY", hide_env_values = true)]
    pub fred_api_key: Option<String>,

    /// Contact string EDGAR requires, e.g. "Company admin@example.com".
    #[arg(long, env = "SEC_USER_AGENT")]
    pub sec_user_agent: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct PolicyCommandArgs {
    /// Limit output to one source (fred or sec).
    #[arg(long)]
    pub source: Option<SourceId>,
}

pub fn parse_date(value: &str) -> Result<Date, ValidationError> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]")).map_err(|_| {
        ValidationError::InvalidDate {
            value: value.to_owned(),
        }
    })
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn parses_ingest_with_comma_separated_items() {
        let cli = Cli::try_parse_from([
            "credmark",
            "ingest",
            "--date",
            "2024-01-02",
            "--fred",
            "DGS10,DGS2",
            "--sec",
            "320193",
            "--dry-run",
        ])
        .expect("valid arguments");

        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest command");
        };
        assert_eq!(args.date, Some(date!(2024 - 01 - 02)));
        assert_eq!(args.fred, vec!["DGS10", "DGS2"]);
        assert_eq!(args.sec, vec!["320193"]);
        assert!(args.dry_run);
    }

    #[test]
    fn policy_flags_are_global() {
        let cli = Cli::try_parse_from([
            "credmark",
            "policy",
            "--source",
            "sec",
            "--rate",
            "2.5",
            "--recovery-timeout",
            "30",
        ])
        .expect("valid arguments");

        let overrides = cli.policy.overrides();
        assert_eq!(overrides.rate, Some(2.5));
        assert_eq!(overrides.recovery_timeout_secs, Some(30.0));
        assert_eq!(overrides.burst, None);
        let Command::Policy(args) = cli.command else {
            panic!("expected policy command");
        };
        assert_eq!(args.source, Some(SourceId::Sec));
    }

    #[test]
    fn rejects_malformed_dates() {
        assert_eq!(parse_date("2024-01-02"), Ok(date!(2024 - 01 - 02)));
        assert_eq!(
            parse_date("01/02/2024"),
            Err(ValidationError::InvalidDate {
                value: String::from("01/02/2024"),
            })
        );
        assert!(Cli::try_parse_from(["credmark", "ingest", "--date", "2024-13-01"]).is_err());
    }
}
