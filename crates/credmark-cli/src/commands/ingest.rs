use std::sync::Arc;

use credmark_core::{
    DependencyPolicy, FredClient, HttpClient, IngestPipeline, NoopHttpClient, PayloadSource,
    PolicyOverrides, RawArchive, ReqwestHttpClient, SecClient, SourceId,
};
use time::OffsetDateTime;
use tracing::{info, info_span, Instrument};

use crate::cli::IngestArgs;
use crate::error::CliError;
use crate::run_id::RunId;

use super::CommandResult;

const DRY_RUN_CREDENTIAL: &str = "dry-run";

pub async fn run(
    args: &IngestArgs,
    overrides: &PolicyOverrides,
) -> Result<CommandResult, CliError> {
    let http: Arc<dyn HttpClient> = if args.dry_run {
        Arc::new(NoopHttpClient)
    } else {
        Arc::new(ReqwestHttpClient::new())
    };
    run_with_transport(args, overrides, http).await
}

async fn run_with_transport(
    args: &IngestArgs,
    overrides: &PolicyOverrides,
    http: Arc<dyn HttpClient>,
) -> Result<CommandResult, CliError> {
    let requests = collect_requests(args)?;
    let date = args
        .date
        .unwrap_or_else(|| OffsetDateTime::now_utc().date());

    let mut pipeline = IngestPipeline::new();
    if !args.dry_run {
        pipeline = pipeline.with_archive(RawArchive::new(args.archive_dir.clone()));
    }
    for (source, _) in &requests {
        let client = build_source(*source, args, Arc::clone(&http))?;
        pipeline.register(client, overrides.apply(DependencyPolicy::default_for(*source))?)?;
    }

    let run_id = RunId::new_v4();
    info!(%run_id, %date, dry_run = args.dry_run, "ingest requested");
    let report = pipeline
        .run(date, requests)
        .instrument(info_span!("ingest", %run_id))
        .await?
        .with_run_id(run_id.to_string());

    let has_failures = report.has_failures();
    Ok(CommandResult::ok(serde_json::to_value(&report)?).with_failures(has_failures))
}

fn collect_requests(args: &IngestArgs) -> Result<Vec<(SourceId, Vec<String>)>, CliError> {
    let trimmed = |items: &[String]| -> Vec<String> {
        items.iter().map(|item| item.trim().to_owned()).collect()
    };

    let mut requests = Vec::new();
    if !args.fred.is_empty() {
        requests.push((SourceId::Fred, trimmed(&args.fred)));
    }
    if !args.sec.is_empty() {
        requests.push((SourceId::Sec, trimmed(&args.sec)));
    }
    if requests.is_empty() {
        return Err(CliError::Command(String::from(
            "nothing to ingest: pass --fred and/or --sec",
        )));
    }
    Ok(requests)
}

fn build_source(
    source: SourceId,
    args: &IngestArgs,
    http: Arc<dyn HttpClient>,
) -> Result<Arc<dyn PayloadSource>, CliError> {
    match source {
        SourceId::Fred => {
            let api_key = credential(
                args.fred_api_key.as_deref(),
                args.dry_run,
                "FRED_API_KEY",
                "fred-api-key",
            )?;
            Ok(Arc::new(FredClient::new(http, api_key)))
        }
        SourceId::Sec => {
            let user_agent = credential(
                args.sec_user_agent.as_deref(),
                args.dry_run,
                "SEC_USER_AGENT",
                "sec-user-agent",
            )?;
            Ok(Arc::new(SecClient::new(http, user_agent)))
        }
    }
}

fn credential(
    value: Option<&str>,
    dry_run: bool,
    name: &'static str,
    flag: &'static str,
) -> Result<String, CliError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => Ok(value.to_owned()),
        None if dry_run => Ok(String::from(DRY_RUN_CREDENTIAL)),
        None => Err(CliError::MissingCredential { name, flag }),
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::path::PathBuf;
    use std::pin::Pin;

    use credmark_core::{HttpError, HttpRequest, HttpResponse};
    use tempfile::tempdir;
    use time::macros::date;

    use super::*;

    /// Answers every request with the same JSON document.
    struct StaticTransport;

    impl HttpClient for StaticTransport {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            Box::pin(async { Ok(HttpResponse::ok_json(r#"{"observations":[]}"#)) })
        }
    }

    fn args(fred: &[&str], sec: &[&str]) -> IngestArgs {
        IngestArgs {
            date: Some(date!(2024 - 01 - 02)),
            fred: fred.iter().map(|item| (*item).to_owned()).collect(),
            sec: sec.iter().map(|item| (*item).to_owned()).collect(),
            archive_dir: PathBuf::from("unused"),
            dry_run: true,
            fred_api_key: None,
            sec_user_agent: None,
        }
    }

    #[tokio::test]
    async fn dry_run_reports_every_item_without_credentials() {
        let result = run(&args(&["DGS10", "DGS2"], &["320193"]), &PolicyOverrides::default())
            .await
            .expect("dry run succeeds");

        assert!(!result.has_failures);
        assert_eq!(result.data["date"], "2024-01-02");
        assert!(result.data["run_id"].is_string());
        assert_eq!(result.data["sources"][0]["source"], "fred");
        assert_eq!(result.data["sources"][0]["succeeded"], 2);
        assert_eq!(result.data["sources"][1]["source"], "sec");
        assert_eq!(result.data["sources"][1]["breaker_state"], "closed");
    }

    #[tokio::test]
    async fn live_run_archives_payloads_under_the_archive_dir() {
        let dir = tempdir().expect("tempdir");
        let mut live = args(&["DGS10", " DGS2"], &["320193"]);
        live.dry_run = false;
        live.archive_dir = dir.path().to_path_buf();
        live.fred_api_key = Some(String::from("key"));
        live.sec_user_agent = Some(String::from("credmark ops@example.com"));

        let overrides = PolicyOverrides::default();
        let result = run_with_transport(&live, &overrides, Arc::new(StaticTransport))
            .await
            .expect("live run succeeds");

        assert!(!result.has_failures);
        for key in [
            "bronze/fred/2024-01-02/DGS10.json",
            "bronze/fred/2024-01-02/DGS2.json",
            "bronze/sec/2024-01-02/320193.json",
        ] {
            assert!(dir.path().join(key).is_file(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn invalid_items_flag_failures() {
        let result = run(&args(&["DGS10"], &["not-a-cik"]), &PolicyOverrides::default())
            .await
            .expect("run completes");

        assert!(result.has_failures);
        assert_eq!(result.data["sources"][1]["failed"], 1);
        assert_eq!(
            result.data["sources"][1]["items"][0]["error"]["code"],
            "source.invalid_request"
        );
    }

    #[tokio::test]
    async fn live_run_requires_credentials() {
        let mut live = args(&["DGS10"], &[]);
        live.dry_run = false;

        let error = run(&live, &PolicyOverrides::default())
            .await
            .err()
            .expect("missing key");

        assert!(matches!(
            error,
            CliError::MissingCredential {
                name: "FRED_API_KEY",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let error = run(&args(&[], &[]), &PolicyOverrides::default())
            .await
            .err()
            .expect("nothing to do");

        assert_eq!(error.exit_code(), 2);
    }
}
