//! JSON-backed documents persisted next to the generated images.
//!
//! Every document is read whole, modified in memory and written whole. Writes go
//! to a temporary sibling first and are renamed over the target, so readers only
//! ever observe the previous or the new version.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::StoreError;

pub mod checkpoint;
pub mod clusters;
pub mod error_log;

pub use checkpoint::Checkpoint;
pub use clusters::{Cluster, ClusterDocument, ClusterLookup};
pub use error_log::{ErrorEntry, ErrorLog};

/// Checkpoint document filename.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";
/// Error log filename.
pub const ERRORS_FILE: &str = "errors.json";
/// Cluster snapshot filename.
pub const CLUSTERS_FILE: &str = "clusters.json";

/// Locations of the three documents inside one output directory.
#[derive(Debug, Clone)]
pub struct StorePaths {
    output_dir: PathBuf,
}

impl StorePaths {
    /// Describes the documents stored under `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Directory holding images and documents.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `checkpoint.json`.
    pub fn checkpoint(&self) -> PathBuf {
        self.output_dir.join(CHECKPOINT_FILE)
    }

    /// `errors.json`.
    pub fn errors(&self) -> PathBuf {
        self.output_dir.join(ERRORS_FILE)
    }

    /// `clusters.json`.
    pub fn clusters(&self) -> PathBuf {
        self.output_dir.join(CLUSTERS_FILE)
    }

    /// Path of an output file inside the directory.
    pub fn output_file(&self, filename: &str) -> PathBuf {
        self.output_dir.join(filename)
    }

    /// Creates the output directory when it is missing.
    pub fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.output_dir).map_err(|err| StoreError::io(&self.output_dir, err))
    }
}

/// Reads and parses a JSON document, returning `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;
    let parsed = serde_json::from_str(&raw).map_err(|err| StoreError::json(path, err))?;
    Ok(Some(parsed))
}

/// Pretty-prints `value` as UTF-8 JSON and atomically replaces `path` with it.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut body = serde_json::to_vec_pretty(value).map_err(|err| StoreError::json(path, err))?;
    body.push(b'\n');
    write_atomic(path, &body)
}

/// Writes `bytes` to a temporary sibling of `path`, then renames it into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = parent_dir(path);
    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| StoreError::io(dir, err))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|err| StoreError::io(tmp.path(), err))?;
    tmp.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    Ok(())
}

/// Copies `source` over `target` with the same write-then-rename strategy.
pub fn copy_atomic(source: &Path, target: &Path) -> Result<(), StoreError> {
    let bytes = fs::read(source).map_err(|err| StoreError::io(source, err))?;
    write_atomic(target, &bytes)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
