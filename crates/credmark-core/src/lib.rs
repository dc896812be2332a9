//! # Credmark Core
//!
//! Resilient concurrent invocation layer for the credmark ingestion pipeline.
//!
//! ## Overview
//!
//! Remote dependencies (FRED, SEC EDGAR) are slow, rate limited and
//! occasionally down. This crate provides the pieces used to call them from
//! many concurrent workers:
//!
//! - **Token-bucket rate limiter** bounding the long-run request rate
//! - **Circuit breaker** failing fast while a dependency is unhealthy
//! - **Retry policy** with exponential backoff for transient failures
//! - **Concurrent executor** fanning work over a bounded worker pool
//! - **Source clients and archive** for the daily ingestion run
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`archive`] | Raw JSON payload archive on disk |
//! | [`circuit_breaker`] | Closed / open / half-open breaker |
//! | [`error`] | Configuration, breaker and task errors; failure classification |
//! | [`executor`] | Bounded worker pool with a shared rate limiter |
//! | [`http_client`] | HTTP transport abstraction (reqwest / no-op) |
//! | [`pipeline`] | Per-source ingestion run and report |
//! | [`policy`] | Per-dependency resilience settings |
//! | [`rate_limiter`] | Token bucket |
//! | [`retry`] | Retry policy and backoff schedules |
//! | [`source`] | Source identifiers and source errors |
//! | [`sources`] | FRED and SEC clients |
//! | [`work`] | Composable wrappers around a unit of work |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use credmark_core::{
//!     DependencyPolicy, FredClient, IngestPipeline, RawArchive, ReqwestHttpClient, SourceId,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let http = Arc::new(ReqwestHttpClient::new());
//!     let mut pipeline = IngestPipeline::new().with_archive(RawArchive::new("data"));
//!     pipeline.register(
//!         Arc::new(FredClient::new(http, std::env::var("FRED_API_KEY")?)),
//!         DependencyPolicy::fred_default(),
//!     )?;
//!
//!     let date = time::macros::date!(2024 - 01 - 02);
//!     let report = pipeline
//!         .run(date, vec![(SourceId::Fred, vec![String::from("DGS10")])])
//!         .await?;
//!     println!("{} items archived", report.total_succeeded());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │ ConcurrentExecutor  │  max_workers tasks, one shared token bucket
//! └──────────┬──────────┘
//!            │ acquire(blocking)
//!            ▼
//! ┌─────────────────────┐
//! │ RateLimiter         │
//! └──────────┬──────────┘
//!            ▼
//! ┌─────────────────────┐
//! │ CircuitBreaker      │  may reject without running the work
//! └──────────┬──────────┘
//!            ▼
//! ┌─────────────────────┐
//! │ RetryPolicy         │  backoff on transient failures
//! └──────────┬──────────┘
//!            ▼
//! ┌─────────────────────┐     ┌──────────────────┐
//! │ PayloadSource       │────▶│ HttpClient       │
//! │ (FRED / SEC)        │     │ (reqwest / noop) │
//! └─────────────────────┘     └──────────────────┘
//! ```

pub mod archive;
pub mod circuit_breaker;
pub mod error;
pub mod executor;
pub mod http_client;
pub mod pipeline;
pub mod policy;
pub mod rate_limiter;
pub mod retry;
pub mod source;
pub mod sources;
pub mod work;

pub use archive::{ArchiveError, RawArchive};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{
    BreakerOpenError, CallError, Classify, ConfigurationError, FailureKind, TaskError,
    ValidationError,
};
pub use executor::{ConcurrentExecutor, ExecutorConfig, Outcome};
pub use http_client::{
    HttpClient, HttpError, HttpRequest, HttpResponse, NoopHttpClient, ReqwestHttpClient,
};
pub use pipeline::{
    IngestPipeline, IngestReport, ItemFailure, ItemReport, PipelineError, SourceReport,
};
pub use policy::{DependencyPolicy, PolicyOverrides};
pub use rate_limiter::{RateLimit, RateLimiter};
pub use retry::{Backoff, RetryPolicy};
pub use source::{SourceError, SourceErrorKind, SourceId};
pub use sources::{FredClient, PayloadFuture, PayloadSource, SecClient};
pub use work::{work_fn, Guarded, Retrying, Throttled, Work, WorkExt, WorkFn, WorkFuture};
