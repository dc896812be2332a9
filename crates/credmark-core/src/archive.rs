//! Raw payload archive on the local filesystem.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use time::Date;
use tokio::fs;

use crate::source::SourceId;

const LAYER: &str = "bronze";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Item identifiers become file names and must not escape their directory.
    #[error("item '{item}' is not a valid archive key")]
    InvalidItem { item: String },
}

/// Writes raw source payloads as
/// `{root}/bronze/{source}/{YYYY-MM-DD}/{item}.json`.
#[derive(Debug, Clone)]
pub struct RawArchive {
    root: PathBuf,
}

impl RawArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative object key, e.g. `bronze/fred/2024-01-02/DGS10.json`.
    pub fn key(source: SourceId, date: Date, item: &str) -> String {
        format!("{LAYER}/{source}/{date}/{item}.json")
    }

    pub fn path_for(&self, source: SourceId, date: Date, item: &str) -> PathBuf {
        self.root.join(Self::key(source, date, item))
    }

    /// Serializes `payload` and writes it, replacing any earlier file for the
    /// same key. Returns the written path.
    pub async fn write_json(
        &self,
        source: SourceId,
        date: Date,
        item: &str,
        payload: &Value,
    ) -> Result<PathBuf, ArchiveError> {
        if item.is_empty() || item.contains(['/', '\\']) || item.starts_with('.') {
            return Err(ArchiveError::InvalidItem {
                item: item.to_owned(),
            });
        }

        let path = self.path_for(source, date, item);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec(payload)?;
        fs::write(&path, body).await?;
        Ok(path)
    }
}
