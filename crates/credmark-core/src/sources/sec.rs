use std::sync::Arc;

use crate::error::ValidationError;
use crate::http_client::{HttpClient, HttpRequest};
use crate::source::{SourceError, SourceId};

use super::{fetch_json, PayloadFuture, PayloadSource};

const DEFAULT_BASE_URL: &str = "https://data.sec.gov";
const CIK_WIDTH: usize = 10;

/// SEC EDGAR submissions client. EDGAR requires a descriptive `User-Agent`.
#[derive(Clone)]
pub struct SecClient {
    http: Arc<dyn HttpClient>,
    user_agent: String,
    base_url: String,
}

impl SecClient {
    pub fn new(http: Arc<dyn HttpClient>, user_agent: impl Into<String>) -> Self {
        Self {
            http,
            user_agent: user_agent.into(),
            base_url: String::from(DEFAULT_BASE_URL),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Left-pads a CIK with zeros to the ten digits EDGAR uses in paths.
    ///
    /// Only bare digits are accepted; surrounding whitespace is rejected so
    /// the archived key always matches the requested CIK.
    pub fn normalize_cik(cik: &str) -> Result<String, ValidationError> {
        if cik.is_empty() || cik.len() > CIK_WIDTH || !cik.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(ValidationError::InvalidCik {
                value: cik.to_owned(),
            });
        }
        Ok(format!("{cik:0>width$}", width = CIK_WIDTH))
    }

    pub(crate) fn submissions_url(&self, padded_cik: &str) -> String {
        format!("{}/submissions/CIK{padded_cik}.json", self.base_url)
    }

    /// Fetches the company's submissions document (metadata and recent filings).
    pub async fn company_submissions(&self, cik: &str) -> Result<serde_json::Value, SourceError> {
        let padded = Self::normalize_cik(cik)?;
        let request = HttpRequest::get(self.submissions_url(&padded))
            .with_header("User-Agent", self.user_agent.as_str());
        fetch_json(&self.http, SourceId::Sec, request).await
    }
}

impl std::fmt::Debug for SecClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecClient")
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl PayloadSource for SecClient {
    fn id(&self) -> SourceId {
        SourceId::Sec
    }

    fn validate_item(&self, item: &str) -> Result<(), SourceError> {
        Self::normalize_cik(item)?;
        Ok(())
    }

    fn fetch<'a>(&'a self, item: &'a str) -> PayloadFuture<'a> {
        Box::pin(self.company_submissions(item))
    }
}
