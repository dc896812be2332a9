use std::sync::Arc;

use crate::error::ValidationError;
use crate::http_client::{HttpClient, HttpRequest};
use crate::source::{SourceError, SourceId};

use super::{fetch_json, PayloadFuture, PayloadSource};

const DEFAULT_BASE_URL: &str = "https://api.stlouisfed.org/fred";

/// FRED series observations client.
#[derive(Clone)]
pub struct FredClient {
    http: Arc<dyn HttpClient>,
    api_key: String,
    base_url: String,
}

impl FredClient {
    pub fn new(http: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: String::from(DEFAULT_BASE_URL),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn validate_series_id(series_id: &str) -> Result<(), ValidationError> {
        if series_id.is_empty() {
            return Err(ValidationError::EmptySeriesId);
        }
        if !series_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            return Err(ValidationError::InvalidSeriesId {
                value: series_id.to_owned(),
            });
        }
        Ok(())
    }

    pub(crate) fn observations_url(&self, series_id: &str) -> String {
        format!(
            "{}/series/observations?series_id={}&api_key={}&file_type=json",
            self.base_url,
            urlencoding::encode(series_id),
            urlencoding::encode(&self.api_key)
        )
    }

    /// Fetches every observation of `series_id` as the raw FRED JSON document.
    pub async fn series_observations(
        &self,
        series_id: &str,
    ) -> Result<serde_json::Value, SourceError> {
        Self::validate_series_id(series_id)?;
        let request = HttpRequest::get(self.observations_url(series_id));
        fetch_json(&self.http, SourceId::Fred, request).await
    }
}

impl std::fmt::Debug for FredClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FredClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl PayloadSource for FredClient {
    fn id(&self) -> SourceId {
        SourceId::Fred
    }

    fn validate_item(&self, item: &str) -> Result<(), SourceError> {
        Ok(Self::validate_series_id(item)?)
    }

    fn fetch<'a>(&'a self, item: &'a str) -> PayloadFuture<'a> {
        Box::pin(self.series_observations(item))
    }
}
