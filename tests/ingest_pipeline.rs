//! Behavior tests for the daily ingestion pipeline against a scripted
//! transport.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use credmark_core::{
    CircuitState, DependencyPolicy, FailureKind, FredClient, HttpClient, HttpError,
    HttpRequest, HttpResponse, IngestPipeline, RawArchive, SecClient, SourceId,
};
use tempfile::tempdir;
use time::macros::date;

/// Answers by URL fragment; each fragment replays its own queue and falls
/// back to its last response once the queue is drained.
#[derive(Default)]
struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Result<HttpResponse, HttpError>>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    fn route(self, fragment: &str, responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(fragment.to_owned(), responses.into());
        self
    }

    fn request_count(&self, fragment: &str) -> usize {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .filter(|request| request.url.contains(fragment))
            .count()
    }
}

impl HttpClient for ScriptedTransport {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let response = {
            let mut routes = self.routes.lock().expect("routes lock");
            routes
                .iter_mut()
                .find(|(fragment, _)| request.url.contains(fragment.as_str()))
                .and_then(|(_, queue)| {
                    if queue.len() > 1 {
                        queue.pop_front()
                    } else {
                        queue.front().cloned()
                    }
                })
                .unwrap_or_else(|| Ok(HttpResponse::with_status(404, "not found")))
        };
        self.requests.lock().expect("requests lock").push(request);
        Box::pin(async move { response })
    }
}

fn policy(source: SourceId) -> DependencyPolicy {
    DependencyPolicy {
        max_workers: 2,
        rate: 1_000.0,
        burst: 10,
        base_delay: Duration::from_millis(10),
        ..DependencyPolicy::default_for(source)
    }
}

#[tokio::test(start_paused = true)]
async fn daily_run_archives_both_sources_by_date() {
    // Given: FRED and SEC both answering successfully
    let dir = tempdir().expect("tempdir");
    let http = Arc::new(
        ScriptedTransport::default()
            .route(
                "series_id=DGS10",
                vec![Ok(HttpResponse::ok_json(r#"{"observations":[{"value":"4.01"}]}"#))],
            )
            .route(
                "series_id=BAMLH0A0HYM2",
                vec![Ok(HttpResponse::ok_json(r#"{"observations":[{"value":"3.12"}]}"#))],
            )
            .route(
                "CIK0000320193",
                vec![Ok(HttpResponse::ok_json(r#"{"name":"Apple Inc."}"#))],
            ),
    );
    let mut pipeline = IngestPipeline::new().with_archive(RawArchive::new(dir.path()));
    pipeline
        .register(Arc::new(FredClient::new(http.clone(), "key")), policy(SourceId::Fred))
        .expect("valid fred policy")
        .register(Arc::new(SecClient::new(http.clone(), "ops@example.com")), policy(SourceId::Sec))
        .expect("valid sec policy");

    // When: the pipeline runs for 2024-03-15
    let report = pipeline
        .run(
            date!(2024 - 03 - 15),
            vec![
                (SourceId::Fred, vec![String::from("DGS10"), String::from("BAMLH0A0HYM2")]),
                (SourceId::Sec, vec![String::from("320193")]),
            ],
        )
        .await
        .expect("sources registered");

    // Then: every item succeeded and landed in its dated partition
    assert!(!report.has_failures());
    assert_eq!(report.total_succeeded(), 3);
    assert_eq!(report.date, "2024-03-15");
    for key in [
        "bronze/fred/2024-03-15/DGS10.json",
        "bronze/fred/2024-03-15/BAMLH0A0HYM2.json",
        "bronze/sec/2024-03-15/320193.json",
    ] {
        assert!(dir.path().join(key).is_file(), "missing {key}");
    }
    let fred = report.source(SourceId::Fred).expect("fred report");
    assert_eq!(
        fred.items.iter().map(|item| item.item.as_str()).collect::<Vec<_>>(),
        vec!["BAMLH0A0HYM2", "DGS10"]
    );
}

#[tokio::test(start_paused = true)]
async fn unhealthy_source_trips_its_breaker_and_spares_the_other() {
    // Given: SEC failing with 503 on every call, FRED healthy, and an SEC
    // breaker that opens after two exhausted items
    let http = Arc::new(
        ScriptedTransport::default()
            .route("submissions", vec![Ok(HttpResponse::with_status(503, "unavailable"))])
            .route("series_id=DGS10", vec![Ok(HttpResponse::ok_json("{}"))]),
    );
    let mut pipeline = IngestPipeline::new();
    pipeline
        .register(Arc::new(FredClient::new(http.clone(), "key")), policy(SourceId::Fred))
        .expect("valid fred policy")
        .register(
            Arc::new(SecClient::new(http.clone(), "ops@example.com")),
            DependencyPolicy {
                max_workers: 1,
                max_attempts: 2,
                failure_threshold: 2,
                ..policy(SourceId::Sec)
            },
        )
        .expect("valid sec policy");

    // When: four companies are requested
    let ciks = ["1", "2", "3", "4"].map(String::from).to_vec();
    let report = pipeline
        .run(
            date!(2024 - 03 - 15),
            vec![
                (SourceId::Sec, ciks),
                (SourceId::Fred, vec![String::from("DGS10")]),
            ],
        )
        .await
        .expect("sources registered");

    // Then: two items exhausted their retries, the rest were rejected fast
    let sec = report.source(SourceId::Sec).expect("sec report");
    assert_eq!((sec.succeeded, sec.failed), (0, 4));
    assert_eq!(sec.breaker_state, CircuitState::Open);
    assert_eq!(http.request_count("submissions"), 4);
    let codes: Vec<&str> = sec
        .items
        .iter()
        .filter_map(|item| item.error.as_ref().map(|error| error.code))
        .collect();
    assert_eq!(codes.iter().filter(|code| **code == "source.unavailable").count(), 2);
    assert_eq!(codes.iter().filter(|code| **code == "source.breaker_open").count(), 2);
    let rejected = sec
        .items
        .iter()
        .filter_map(|item| item.error.as_ref())
        .find(|error| error.code == "source.breaker_open")
        .expect("a rejected item");
    assert_eq!(rejected.kind, FailureKind::BreakerOpen);
    assert!(rejected.message.contains("is OPEN"));

    // And: FRED is unaffected
    let fred = report.source(SourceId::Fred).expect("fred report");
    assert_eq!((fred.succeeded, fred.failed), (1, 0));
    assert_eq!(fred.breaker_state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn permanent_rejections_are_not_retried() {
    // Given: FRED answering 400 for an unknown series
    let http = Arc::new(
        ScriptedTransport::default()
            .route("series_id=NOPE", vec![Ok(HttpResponse::with_status(400, "bad series"))]),
    );
    let mut pipeline = IngestPipeline::new();
    pipeline
        .register(Arc::new(FredClient::new(http.clone(), "s3cret")), policy(SourceId::Fred))
        .expect("valid policy");

    // When: the series is requested
    let report = pipeline
        .run(date!(2024 - 03 - 15), vec![(SourceId::Fred, vec![String::from("NOPE")])])
        .await
        .expect("source registered");

    // Then: exactly one request was made and the report keeps the key private
    assert_eq!(http.request_count("series_id=NOPE"), 1);
    let failure = report.sources[0].items[0].error.clone().expect("failed item");
    assert_eq!(failure.kind, FailureKind::Permanent);
    assert_eq!(failure.code, "source.rejected");
    let json = serde_json::to_string(&report).expect("serializable");
    assert!(!json.contains("s3cret"));
}

#[tokio::test(start_paused = true)]
async fn breaker_state_carries_over_between_runs() {
    // Given: a run that leaves the SEC breaker open
    let http = Arc::new(
        ScriptedTransport::default()
            .route("submissions", vec![Ok(HttpResponse::with_status(500, "boom"))]),
    );
    let mut pipeline = IngestPipeline::new();
    pipeline
        .register(
            Arc::new(SecClient::new(http.clone(), "ops@example.com")),
            DependencyPolicy {
                max_attempts: 1,
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
                ..policy(SourceId::Sec)
            },
        )
        .expect("valid policy");
    pipeline
        .run(date!(2024 - 03 - 15), vec![(SourceId::Sec, vec![String::from("1")])])
        .await
        .expect("source registered");
    assert_eq!(pipeline.breaker(SourceId::Sec).map(|b| b.state()), Some(CircuitState::Open));

    // When: the next run starts before the cooldown has elapsed
    let report = pipeline
        .run(date!(2024 - 03 - 16), vec![(SourceId::Sec, vec![String::from("2")])])
        .await
        .expect("source registered");

    // Then: the item is rejected without another request
    assert_eq!(http.request_count("submissions"), 1);
    let failure = report.sources[0].items[0].error.clone().expect("failed item");
    assert_eq!(failure.kind, FailureKind::BreakerOpen);
}

#[tokio::test(start_paused = true)]
async fn padded_identifiers_are_rejected_before_any_request() {
    // Given: an archive-backed pipeline and a CIK with surrounding spaces
    let dir = tempdir().expect("tempdir");
    let http = Arc::new(
        ScriptedTransport::default()
            .route("submissions", vec![Ok(HttpResponse::ok_json(r#"{"name":"Apple Inc."}"#))]),
    );
    let mut pipeline = IngestPipeline::new().with_archive(RawArchive::new(dir.path()));
    pipeline
        .register(
            Arc::new(SecClient::new(http.clone(), "ops@example.com")),
            policy(SourceId::Sec),
        )
        .expect("valid policy");

    // When: the padded CIK is requested
    let report = pipeline
        .run(date!(2024 - 03 - 15), vec![(SourceId::Sec, vec![String::from(" 320193 ")])])
        .await
        .expect("source registered");

    // Then: it fails validation, nothing is fetched and nothing is archived
    let failure = report.sources[0].items[0].error.clone().expect("failed item");
    assert_eq!(failure.code, "source.invalid_request");
    assert_eq!(http.request_count("submissions"), 0);
    assert!(!dir.path().join("bronze").exists());
}
