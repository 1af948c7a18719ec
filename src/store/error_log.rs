//! Append-only log of per-question failures.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{read_json, write_json};
use crate::error::StoreError;

/// A single failed attempt at producing an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Question that failed.
    pub question_id: String,
    /// Rendered failure message.
    #[serde(rename = "error", alias = "error_message")]
    pub error_message: String,
    /// When the failure was recorded. New entries are RFC 3339 UTC; existing
    /// entries are carried through rewrites verbatim.
    pub timestamp: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ErrorDocument {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

/// Handle on `errors.json`.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    /// Binds the log to `path`; nothing is read until needed.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File backing the log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every entry currently on disk, oldest first.
    pub fn entries(&self) -> Result<Vec<ErrorEntry>, StoreError> {
        Ok(read_json::<ErrorDocument>(&self.path)?
            .unwrap_or_default()
            .errors)
    }

    /// Appends one entry stamped with the current time and rewrites the document.
    pub fn append(&self, question_id: &str, error_message: &str) -> Result<ErrorEntry, StoreError> {
        let entry = ErrorEntry {
            question_id: question_id.to_string(),
            error_message: error_message.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let mut document = read_json::<ErrorDocument>(&self.path)?.unwrap_or_default();
        document.errors.push(entry.clone());
        write_json(&self.path, &document)?;
        Ok(entry)
    }
}
