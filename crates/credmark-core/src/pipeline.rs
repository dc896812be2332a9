//! Daily ingestion: fan each source's items out over its executor, fetch
//! through the source's breaker and retry policy, archive the raw payloads.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use time::Date;
use tracing::{info, info_span, warn, Instrument};

use crate::archive::RawArchive;
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::error::{CallError, Classify, ConfigurationError, FailureKind, TaskError};
use crate::executor::ConcurrentExecutor;
use crate::policy::DependencyPolicy;
use crate::retry::RetryPolicy;
use crate::source::{SourceError, SourceId};
use crate::sources::PayloadSource;

#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("source '{source_id}' is not registered with the pipeline")]
    NotRegistered { source_id: SourceId },
}

/// Per-source resilience stack. The breaker outlives individual runs.
struct SourceStack {
    source: Arc<dyn PayloadSource>,
    policy: DependencyPolicy,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    executor: ConcurrentExecutor,
}

#[derive(Default)]
pub struct IngestPipeline {
    archive: Option<RawArchive>,
    sources: BTreeMap<SourceId, SourceStack>,
}

impl IngestPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archives every fetched payload under `archive`. Without an archive
    /// payloads are fetched and dropped.
    pub fn with_archive(mut self, archive: RawArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Builds the breaker, retry policy and executor for `source`, replacing
    /// any earlier registration of the same source.
    pub fn register(
        &mut self,
        source: Arc<dyn PayloadSource>,
        policy: DependencyPolicy,
    ) -> Result<&mut Self, PipelineError> {
        let id = source.id();
        policy.validate()?;

        let breaker = Arc::new(CircuitBreaker::new(id.as_str(), policy.breaker_config())?);
        let retry = policy.retry_policy()?;
        let executor = ConcurrentExecutor::new(id.as_str(), policy.executor_config())?;

        self.sources.insert(
            id,
            SourceStack {
                source,
                policy,
                breaker,
                retry,
                executor,
            },
        );
        Ok(self)
    }

    pub fn policy(&self, source: SourceId) -> Option<&DependencyPolicy> {
        self.sources.get(&source).map(|stack| &stack.policy)
    }

    pub fn breaker(&self, source: SourceId) -> Option<&CircuitBreaker> {
        self.sources.get(&source).map(|stack| stack.breaker.as_ref())
    }

    /// Ingests `items` for each requested source. Sources run concurrently;
    /// every item yields exactly one entry in the report.
    pub async fn run(
        &self,
        date: Date,
        requests: Vec<(SourceId, Vec<String>)>,
    ) -> Result<IngestReport, PipelineError> {
        let mut batches = Vec::with_capacity(requests.len());
        for (source, items) in requests {
            let stack = self
                .sources
                .get(&source)
                .ok_or(PipelineError::NotRegistered { source_id: source })?;
            batches.push((stack, items));
        }

        info!(%date, sources = batches.len(), "starting ingestion run");
        let reports = join_all(batches.into_iter().map(|(stack, items)| {
            let span = info_span!("ingest_source", source = %stack.source.id());
            self.run_source(stack, date, items).instrument(span)
        }))
        .await;

        let report = IngestReport {
            run_id: None,
            date: date.to_string(),
            sources: reports,
        };
        info!(
            %date,
            succeeded = report.total_succeeded(),
            failed = report.total_failed(),
            "ingestion run complete"
        );
        Ok(report)
    }

    async fn run_source(
        &self,
        stack: &SourceStack,
        date: Date,
        items: Vec<String>,
    ) -> SourceReport {
        let id = stack.source.id();
        let requested = items.len();

        let work = {
            let source = Arc::clone(&stack.source);
            let breaker = Arc::clone(&stack.breaker);
            let retry = stack.retry.clone();
            let archive = self.archive.clone();
            move |item: String| {
                let source = Arc::clone(&source);
                let breaker = Arc::clone(&breaker);
                let retry = retry.clone();
                let archive = archive.clone();
                async move {
                    let archive = archive.as_ref();
                    ingest_item(source.as_ref(), &breaker, &retry, archive, date, &item).await
                }
            }
        };

        let mut entries: Vec<ItemReport> = stack
            .executor
            .execute(items, work)
            .await
            .into_iter()
            .map(|(item, outcome)| ItemReport::from_outcome(item, outcome))
            .collect();
        entries.sort_by(|left, right| left.item.cmp(&right.item));

        let failed = entries.iter().filter(|entry| !entry.ok).count();
        let breaker_state = stack.breaker.state();
        if failed > 0 {
            warn!(source = %id, failed, requested, %breaker_state, "source finished with failures");
        } else {
            info!(source = %id, requested, "source finished");
        }

        SourceReport {
            source: id,
            requested,
            succeeded: requested - failed,
            failed,
            breaker_state,
            items: entries,
        }
    }
}

/// Fetch through breaker and retry, then archive. Retry sits inside the
/// breaker so one exhausted item counts as a single breaker failure.
async fn ingest_item(
    source: &dyn PayloadSource,
    breaker: &CircuitBreaker,
    retry: &RetryPolicy,
    archive: Option<&RawArchive>,
    date: Date,
    item: &str,
) -> Result<Option<PathBuf>, SourceError> {
    // Malformed ids are the caller's fault and must not trip the breaker.
    source.validate_item(item)?;

    let payload = breaker
        .call(|| retry.run(|| source.fetch(item)))
        .await
        .map_err(|error| match error {
            CallError::Open(open) => SourceError::breaker_open(open.to_string()),
            CallError::Failed(error) => error,
        })?;

    match archive {
        Some(archive) => archive
            .write_json(source.id(), date, item, &payload)
            .await
            .map(Some)
            .map_err(|error| SourceError::archive(format!("failed to archive {item}: {error}"))),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub kind: FailureKind,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub item: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemFailure>,
}

impl ItemReport {
    fn from_outcome(
        item: String,
        outcome: Result<Option<PathBuf>, TaskError<SourceError>>,
    ) -> Self {
        match outcome {
            Ok(archive_path) => Self {
                item,
                ok: true,
                archive_path,
                error: None,
            },
            Err(error) => {
                let failure = ItemFailure {
                    kind: error.failure_kind(),
                    code: match &error {
                        TaskError::Failed(source_error) => source_error.code(),
                        TaskError::Panicked(_) => "task.panicked",
                    },
                    message: error.to_string(),
                };
                Self {
                    item,
                    ok: false,
                    archive_path: None,
                    error: Some(failure),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: SourceId,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub breaker_state: CircuitState,
    pub items: Vec<ItemReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub date: String,
    pub sources: Vec<SourceReport>,
}

impl IngestReport {
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn source(&self, source: SourceId) -> Option<&SourceReport> {
        self.sources.iter().find(|report| report.source == source)
    }

    pub fn total_succeeded(&self) -> usize {
        self.sources.iter().map(|report| report.succeeded).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.sources.iter().map(|report| report.failed).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.total_failed() > 0
    }
}
