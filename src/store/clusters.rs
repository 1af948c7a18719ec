//! Snapshot of the visual-equivalence clusters and the lookup derived from it.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{read_json, write_json};
use crate::error::StoreError;

/// Current snapshot format version.
pub const CLUSTER_DOCUMENT_VERSION: u32 = 1;

/// Questions judged to depict the same scene and share one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Globally unique id, `{domain}_{age_category}_{sequence}`.
    pub cluster_id: String,
    /// Source-language domain label shared by every member.
    pub domain: String,
    /// Age bucket shared by every member.
    pub age_category: String,
    /// Member whose generated image the rest reuse. Always in `question_ids`.
    pub canonical_id: String,
    /// Member question ids.
    pub question_ids: Vec<String>,
    /// Justification given by the grouping model (or the fallback marker).
    #[serde(default)]
    pub reason: String,
}

/// Persisted `clusters.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDocument {
    /// Format version.
    pub version: u32,
    /// Content hash of the CSV the snapshot was built from.
    #[serde(rename = "csv_hash", alias = "source_hash", default)]
    pub source_hash: String,
    /// Build time, RFC 3339.
    pub created_at: String,
    /// Number of clustered question ids.
    pub total_questions: usize,
    /// Number of clusters.
    pub total_clusters: usize,
    /// Every cluster, in partition order.
    pub clusters: Vec<Cluster>,
}

impl ClusterDocument {
    /// Wraps freshly built clusters, filling the totals.
    pub fn new(source_hash: impl Into<String>, clusters: Vec<Cluster>) -> Self {
        Self {
            version: CLUSTER_DOCUMENT_VERSION,
            source_hash: source_hash.into(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            total_questions: clusters.iter().map(|c| c.question_ids.len()).sum(),
            total_clusters: clusters.len(),
            clusters,
        }
    }

    /// Loads the snapshot, or `None` when it has not been built yet.
    pub fn load(path: &Path) -> Result<Option<Self>, StoreError> {
        read_json(path)
    }

    /// Persists the snapshot.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json(path, self)
    }

    /// Whether the snapshot was built from a CSV with a different hash.
    pub fn is_stale(&self, current_source_hash: &str) -> bool {
        self.source_hash != current_source_hash
    }

    /// Flattens the clusters into the lookup used while processing.
    pub fn lookup(&self) -> ClusterLookup {
        ClusterLookup::from_clusters(&self.clusters)
    }
}

/// `question_id -> canonical_id` plus the set of canonical ids.
#[derive(Debug, Clone, Default)]
pub struct ClusterLookup {
    canonical_map: HashMap<String, String>,
    canonical_set: HashSet<String>,
}

impl ClusterLookup {
    /// Builds the lookup; canonicals map to themselves.
    pub fn from_clusters(clusters: &[Cluster]) -> Self {
        let mut lookup = Self::default();
        for cluster in clusters {
            lookup.canonical_set.insert(cluster.canonical_id.clone());
            for id in &cluster.question_ids {
                lookup
                    .canonical_map
                    .insert(id.clone(), cluster.canonical_id.clone());
            }
        }
        lookup
    }

    /// Canonical id of the cluster containing `id`.
    pub fn canonical_of(&self, id: &str) -> Option<&str> {
        self.canonical_map.get(id).map(String::as_str)
    }

    /// Whether `id` is the representative of some cluster.
    pub fn is_canonical(&self, id: &str) -> bool {
        self.canonical_set.contains(id)
    }

    /// Canonical to copy from when `id` is a clustered, non-canonical member.
    pub fn copy_source(&self, id: &str) -> Option<&str> {
        if self.is_canonical(id) {
            return None;
        }
        self.canonical_of(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cluster(canonical: &str, members: &[&str]) -> Cluster {
        Cluster {
            cluster_id: format!("komunikasi_baby_{canonical}"),
            domain: "Komunikasi".into(),
            age_category: "baby".into(),
            canonical_id: canonical.into(),
            question_ids: members.iter().map(|m| m.to_string()).collect(),
            reason: String::new(),
        }
    }

    #[test]
    fn lookup_distinguishes_canonical_members() {
        let lookup = ClusterLookup::from_clusters(&[cluster("a", &["a", "b"]), cluster("c", &["c"])]);
        assert_eq!(lookup.canonical_of("b"), Some("a"));
        assert_eq!(lookup.canonical_of("a"), Some("a"));
        assert_eq!(lookup.copy_source("b"), Some("a"));
        assert_eq!(lookup.copy_source("a"), None);
        assert_eq!(lookup.copy_source("c"), None);
        assert_eq!(lookup.copy_source("zzz"), None);
        assert!(lookup.is_canonical("c"));
        assert!(!lookup.is_canonical("b"));
        assert_eq!(lookup.canonical_of("zzz"), None);
    }

    #[test]
    fn document_uses_csv_hash_key_and_totals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clusters.json");
        let doc = ClusterDocument::new("abc", vec![cluster("a", &["a", "b"])]);
        assert_eq!(doc.total_questions, 2);
        assert_eq!(doc.total_clusters, 1);
        doc.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["csv_hash"], "abc");
        assert_eq!(raw["version"], 1);

        let loaded = ClusterDocument::load(&path).unwrap().expect("present");
        assert!(!loaded.is_stale("abc"));
        assert!(loaded.is_stale("def"));
    }
}
