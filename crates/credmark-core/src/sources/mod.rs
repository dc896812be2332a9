//! Thin clients for the two upstream APIs.
//!
//! Each client turns one item identifier into one HTTP GET and hands back the
//! raw JSON body. Resilience is applied by the caller.

mod fred;
mod sec;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::http_client::{HttpClient, HttpRequest};
use crate::source::{SourceError, SourceId};

pub use fred::FredClient;
pub use sec::SecClient;

pub type PayloadFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, SourceError>> + Send + 'a>>;

/// A source that can fetch the raw payload for one item.
pub trait PayloadSource: Send + Sync {
    fn id(&self) -> SourceId;

    /// Rejects malformed identifiers before any request is made.
    fn validate_item(&self, item: &str) -> Result<(), SourceError>;

    fn fetch<'a>(&'a self, item: &'a str) -> PayloadFuture<'a>;
}

async fn fetch_json(
    http: &Arc<dyn HttpClient>,
    source: SourceId,
    request: HttpRequest,
) -> Result<Value, SourceError> {
    let response = http.execute(request).await.map_err(|error| {
        if error.retryable() {
            SourceError::unavailable(format!("{source} transport error: {}", error.message()))
        } else {
            SourceError::invalid_request(format!("{source} transport error: {}", error.message()))
        }
    })?;

    if !response.is_success() {
        return Err(SourceError::from_status(source, response.status));
    }

    serde_json::from_str(&response.body)
        .map_err(|error| SourceError::decode(format!("{source} returned invalid JSON: {error}")))
}
