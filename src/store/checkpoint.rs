//! Run progress record enabling resumable, idempotent re-execution.

use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use super::{read_json, write_json};
use crate::error::StoreError;

/// Persisted checkpoint document.
///
/// Every id present in `duplicates` or `cluster_copies` is also in `completed`;
/// the mutators below are the only way entries get added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Ids whose output file has been written, in completion order.
    #[serde(default)]
    pub completed: IndexSet<String>,
    /// Content hash of question text -> filename first generated for it.
    #[serde(default)]
    pub hashes: IndexMap<String, String>,
    /// Id -> filename it was copied from because the text was identical.
    #[serde(default)]
    pub duplicates: IndexMap<String, String>,
    /// Id -> canonical id it was copied from through clustering.
    #[serde(default)]
    pub cluster_copies: IndexMap<String, String>,
}

impl Checkpoint {
    /// Whether `id` already has an output file.
    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.contains(id)
    }

    /// Filename previously generated for the given content hash.
    pub fn hash_source(&self, hash: &str) -> Option<&str> {
        self.hashes.get(hash).map(String::as_str)
    }

    /// Records a freshly generated image.
    ///
    /// The first filename seen for a hash is kept unless `replace_existing` is
    /// set, which callers use when the recorded file has gone missing.
    pub fn record_generated(
        &mut self,
        id: &str,
        hash: &str,
        filename: &str,
        replace_existing: bool,
    ) {
        self.completed.insert(id.to_string());
        if replace_existing || !self.hashes.contains_key(hash) {
            self.hashes.insert(hash.to_string(), filename.to_string());
        }
    }

    /// Records a copy made because the question text matched an earlier one.
    pub fn record_duplicate(&mut self, id: &str, source_filename: &str) {
        self.completed.insert(id.to_string());
        self.duplicates
            .insert(id.to_string(), source_filename.to_string());
    }

    /// Records a copy made from the cluster's canonical image.
    pub fn record_cluster_copy(&mut self, id: &str, canonical_id: &str) {
        self.completed.insert(id.to_string());
        self.cluster_copies
            .insert(id.to_string(), canonical_id.to_string());
    }
}

/// Checkpoint bound to its file on disk; every mutation is followed by [`save`](Self::save).
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    data: Checkpoint,
}

impl CheckpointStore {
    /// Loads the checkpoint at `path`, starting empty when it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = read_json(&path)?.unwrap_or_default();
        Ok(Self { path, data })
    }

    /// Current in-memory state.
    pub fn data(&self) -> &Checkpoint {
        &self.data
    }

    /// File backing this checkpoint.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `change` and persists the whole document immediately.
    pub fn update<F>(&mut self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Checkpoint),
    {
        change(&mut self.data);
        self.save()
    }

    /// Writes the current state to disk.
    pub fn save(&self) -> Result<(), StoreError> {
        write_json(&self.path, &self.data)
    }
}
