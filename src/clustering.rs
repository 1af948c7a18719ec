//! Semantic clustering of questions that depict the same visual scene.
//!
//! Questions are partitioned by `(domain, age category)`; within each partition a
//! language model proposes groups that can share one illustration. Responses are
//! interpreted by pure functions ([`interpret_response`], [`resolve_clusters`]) so
//! validation can be exercised without a model or any delays. A partition whose
//! grouping cannot be obtained degrades to singleton clusters.

use std::collections::{BTreeMap, HashSet};
use std::thread;
use std::time::Duration;

use indexmap::IndexSet;
use serde::Deserialize;
use tracing::{info, warn};

use crate::age::AgeCategory;
use crate::error::ClusterResponseError;
use crate::llm::{CompletionRequest, TextGenerator};
use crate::questions::Question;
use crate::store::{Cluster, ClusterDocument};

/// Reason recorded on clusters produced by the fallback path.
pub const FALLBACK_REASON: &str = "Fallback: single-question cluster";

const GROUPING_MAX_TOKENS: usize = 4096;
const GROUPING_TEMPERATURE: f32 = 0.3;
const GROUPING_SYSTEM: &str = "You are an expert at analyzing child development screening questions. \
     Return ONLY valid JSON, no markdown fences, no explanation.";

/// Knobs for the clustering pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSettings {
    /// Language model asked for groupings.
    pub model: String,
    /// Attempts per partition before falling back.
    pub attempts: usize,
    /// Delay before the first retry; doubles on each subsequent one.
    pub retry_base_delay: Duration,
    /// Sleep after each partition.
    pub partition_delay: Duration,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            attempts: 3,
            retry_base_delay: Duration::from_secs(2),
            partition_delay: Duration::from_millis(1500),
        }
    }
}

impl ClusterSettings {
    /// Backoff before retry number `attempt` (1-based count of failures so far).
    pub fn retry_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.retry_base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Questions sharing one `(domain, age category)` pair.
#[derive(Debug, Clone)]
pub struct Partition<'a> {
    /// Source-language domain label.
    pub domain: String,
    /// Age bucket.
    pub category: AgeCategory,
    /// Members in source order.
    pub questions: Vec<&'a Question>,
}

impl Partition<'_> {
    /// Distinct member ids in first-seen order; colliding rows share one id.
    pub fn ids(&self) -> Vec<String> {
        self.questions
            .iter()
            .map(|q| q.id().to_string())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Splits questions into partitions, sorted by domain then age bucket.
pub fn partition_questions(questions: &[Question]) -> Vec<Partition<'_>> {
    let mut groups: BTreeMap<(String, AgeCategory), Vec<&Question>> = BTreeMap::new();
    for question in questions {
        groups
            .entry((question.domain.clone(), question.age_category()))
            .or_default()
            .push(question);
    }
    groups
        .into_iter()
        .map(|((domain, category), questions)| Partition {
            domain,
            category,
            questions,
        })
        .collect()
}

/// Raw grouping proposal as returned by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupingResponse {
    /// Proposed clusters.
    pub clusters: Vec<ProposedCluster>,
}

/// One proposed cluster before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct ProposedCluster {
    /// Declared representative.
    #[serde(default)]
    pub canonical_id: String,
    /// Declared members; defaults to the canonical alone.
    #[serde(default)]
    pub question_ids: Option<Vec<String>>,
    /// Human-readable justification.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Parses the model's reply, tolerating surrounding markdown code fences.
pub fn interpret_response(raw: Option<&str>) -> Result<GroupingResponse, ClusterResponseError> {
    let content = raw.map(str::trim).unwrap_or_default();
    if content.is_empty() {
        return Err(ClusterResponseError::Empty);
    }
    let body = strip_code_fence(content);
    Ok(serde_json::from_str(body)?)
}

fn strip_code_fence(content: &str) -> &str {
    if !content.starts_with("```") {
        return content;
    }
    let without_open = content.trim_start_matches('`');
    let without_lang = without_open
        .strip_prefix("json")
        .unwrap_or(without_open)
        .trim_start();
    without_lang
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(without_lang)
        .trim_end()
}

/// Hands out globally unique cluster ids across partitions.
#[derive(Debug, Default)]
pub struct ClusterIdSequence {
    next: usize,
}

impl ClusterIdSequence {
    /// Next id for the given partition, e.g. `motorik_kasar_baby_3`.
    pub fn next_id(&mut self, domain: &str, category: AgeCategory) -> String {
        self.next += 1;
        format!(
            "{}_{}_{}",
            domain.to_lowercase().replace(' ', "_"),
            category.as_str(),
            self.next
        )
    }
}

/// Validates a grouping against the partition it was asked about.
///
/// Unknown ids are dropped, ids already claimed by an earlier cluster are
/// dropped, an invalid canonical is replaced by the first valid member, empty
/// clusters are skipped and members the model never mentioned become singletons.
pub fn resolve_clusters(
    response: GroupingResponse,
    partition: &Partition<'_>,
    sequence: &mut ClusterIdSequence,
) -> Vec<Cluster> {
    let known: Vec<String> = partition.ids();
    let known_set: HashSet<&str> = known.iter().map(String::as_str).collect();
    let mut claimed: HashSet<String> = HashSet::new();
    let mut clusters = Vec::new();

    for proposed in response.clusters {
        let declared = proposed
            .question_ids
            .unwrap_or_else(|| vec![proposed.canonical_id.clone()]);
        let mut members = Vec::new();
        for id in declared {
            if !known_set.contains(id.as_str()) {
                warn!(
                    domain = %partition.domain,
                    age_category = %partition.category,
                    question_id = %id,
                    "dropping unknown question id from cluster"
                );
                continue;
            }
            if claimed.contains(&id) || members.contains(&id) {
                warn!(question_id = %id, "question already assigned to a cluster, dropping");
                continue;
            }
            members.push(id);
        }
        if members.is_empty() {
            warn!(
                domain = %partition.domain,
                age_category = %partition.category,
                "skipping cluster with no valid question ids"
            );
            continue;
        }
        let canonical_id = if members.contains(&proposed.canonical_id) {
            proposed.canonical_id
        } else {
            members[0].clone()
        };
        claimed.extend(members.iter().cloned());
        clusters.push(Cluster {
            cluster_id: sequence.next_id(&partition.domain, partition.category),
            domain: partition.domain.clone(),
            age_category: partition.category.as_str().to_string(),
            canonical_id,
            question_ids: members,
            reason: proposed.reason.unwrap_or_default(),
        });
    }

    for id in known {
        if !claimed.contains(&id) {
            clusters.push(singleton(id, partition, sequence, "Not grouped by model"));
        }
    }
    clusters
}

/// One singleton cluster per partition member.
pub fn fallback_clusters(partition: &Partition<'_>, sequence: &mut ClusterIdSequence) -> Vec<Cluster> {
    partition
        .ids()
        .into_iter()
        .map(|id| singleton(id, partition, sequence, FALLBACK_REASON))
        .collect()
}

fn singleton(
    id: String,
    partition: &Partition<'_>,
    sequence: &mut ClusterIdSequence,
    reason: &str,
) -> Cluster {
    Cluster {
        cluster_id: sequence.next_id(&partition.domain, partition.category),
        domain: partition.domain.clone(),
        age_category: partition.category.as_str().to_string(),
        canonical_id: id.clone(),
        question_ids: vec![id],
        reason: reason.to_string(),
    }
}

/// User instruction listing a partition's questions for the grouping model.
pub fn grouping_instruction(partition: &Partition<'_>) -> String {
    let lines: Vec<String> = partition
        .questions
        .iter()
        .enumerate()
        .map(|(idx, q)| format!("{}. [{}] {}", idx + 1, q.id(), q.question_text))
        .collect();
    format!(
        "You are clustering ASQ-3 developmental screening questions for image generation.\n\
         Questions that describe the same visual scene/activity should share one image.\n\n\
         Domain: {domain}\n\
         Age Category: {category} ({description})\n\n\
         Questions:\n{questions}\n\n\
         Group these questions into clusters where each cluster will share one illustration.\n\
         Questions that are unique should be in their own single-question cluster.\n\
         Return ONLY valid JSON (no markdown, no explanation):\n\
         {{\"clusters\": [{{\"canonical_id\": \"question_id_here\", \"question_ids\": [\"id1\", \"id2\"], \"reason\": \"Brief reason why these share an image\"}}]}}",
        domain = partition.domain,
        category = partition.category,
        description = partition.category.description(),
        questions = lines.join("\n"),
    )
}

/// Runs the clustering pass against a text capability.
pub struct ClusteringEngine<T> {
    text: T,
    settings: ClusterSettings,
}

impl<T: TextGenerator> ClusteringEngine<T> {
    /// Builds an engine over `text`.
    pub fn new(text: T, settings: ClusterSettings) -> Self {
        Self { text, settings }
    }

    /// Clusters every question and wraps the result in a snapshot tagged with `source_hash`.
    pub fn build(&self, questions: &[Question], source_hash: &str) -> ClusterDocument {
        let partitions = partition_questions(questions);
        info!(
            questions = questions.len(),
            partitions = partitions.len(),
            "grouped questions into domain/age partitions"
        );

        let mut sequence = ClusterIdSequence::default();
        let mut clusters = Vec::new();
        for partition in &partitions {
            info!(
                domain = %partition.domain,
                age_category = %partition.category,
                span = partition.category.description(),
                questions = partition.questions.len(),
                "clustering partition"
            );
            let resolved = match self.request_grouping(partition) {
                Some(response) => resolve_clusters(response, partition, &mut sequence),
                None => {
                    warn!(
                        domain = %partition.domain,
                        age_category = %partition.category,
                        attempts = self.settings.attempts,
                        "failed to cluster partition, falling back to single-question clusters"
                    );
                    fallback_clusters(partition, &mut sequence)
                }
            };
            info!(clusters = resolved.len(), "partition clustered");
            clusters.extend(resolved);
            sleep(self.settings.partition_delay);
        }

        let document = ClusterDocument::new(source_hash, clusters);
        info!(
            questions = document.total_questions,
            clusters = document.total_clusters,
            "clustering complete"
        );
        document
    }

    /// Asks for a grouping up to `attempts` times, backing off between failures.
    fn request_grouping(&self, partition: &Partition<'_>) -> Option<GroupingResponse> {
        let user = grouping_instruction(partition);
        let request = CompletionRequest {
            model: &self.settings.model,
            system: GROUPING_SYSTEM,
            user: &user,
            max_tokens: GROUPING_MAX_TOKENS,
            temperature: GROUPING_TEMPERATURE,
        };
        let attempts = self.settings.attempts.max(1);
        for attempt in 1..=attempts {
            let outcome = self
                .text
                .complete(&request)
                .map_err(|err| format!("API error: {err:#}"))
                .and_then(|reply| {
                    interpret_response(reply.as_deref()).map_err(|err| err.to_string())
                });
            match outcome {
                Ok(response) => return Some(response),
                Err(reason) => {
                    warn!(attempt, attempts, error = %reason, "clustering attempt failed");
                    if attempt < attempts {
                        sleep(self.settings.retry_delay(attempt));
                    }
                }
            }
        }
        None
    }
}

fn sleep(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn questions() -> Vec<Question> {
        vec![
            Question::new("2 Bulan", "Komunikasi", "1", "Tersenyum?", "Ya"),
            Question::new("4 Bulan", "Komunikasi", "2", "Tertawa?", "Ya"),
            Question::new("2 Bulan", "Komunikasi", "3", "Mengoceh?", "Ya"),
            Question::new("12 Bulan", "Komunikasi", "1", "Menunjuk?", "Ya"),
            Question::new("2 Bulan", "Motorik Kasar", "1", "Menendang?", "Ya"),
        ]
    }

    #[test]
    fn partitions_never_cross_domain_or_age() {
        let qs = questions();
        let partitions = partition_questions(&qs);
        assert_eq!(partitions.len(), 3);
        for p in &partitions {
            assert!(p
                .questions
                .iter()
                .all(|q| q.domain == p.domain && q.age_category() == p.category));
        }
        assert_eq!(partitions[0].domain, "Komunikasi");
        assert_eq!(partitions[0].category, AgeCategory::Baby);
        assert_eq!(partitions[0].questions.len(), 3);
        assert_eq!(partitions[1].category, AgeCategory::Infant);
    }

    #[test]
    fn strips_code_fences() {
        let raw = "```json\n{\"clusters\": []}\n```";
        assert!(interpret_response(Some(raw)).unwrap().clusters.is_empty());
        let raw = "```\n{\"clusters\": []}```";
        assert!(interpret_response(Some(raw)).is_ok());
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert!(matches!(interpret_response(None), Err(ClusterResponseError::Empty)));
        assert!(matches!(interpret_response(Some("  ")), Err(ClusterResponseError::Empty)));
        assert!(matches!(
            interpret_response(Some("sure, here you go")),
            Err(ClusterResponseError::Malformed(_))
        ));
        assert!(matches!(
            interpret_response(Some("{\"groups\": []}")),
            Err(ClusterResponseError::Malformed(_))
        ));
    }

    #[test]
    fn validation_drops_unknown_and_repairs_canonical() {
        let qs = questions();
        let partitions = partition_questions(&qs);
        let baby = &partitions[0];
        let raw = r#"{"clusters": [
            {"canonical_id": "ghost", "question_ids": ["2-bulan_komunikasi_3", "ghost", "2-bulan_komunikasi_1"], "reason": "vocal"},
            {"canonical_id": "nobody", "question_ids": ["nobody"]}
        ]}"#;
        let response = interpret_response(Some(raw)).unwrap();
        let mut seq = ClusterIdSequence::default();
        let clusters = resolve_clusters(response, baby, &mut seq);

        assert_eq!(clusters[0].canonical_id, "2-bulan_komunikasi_3");
        assert_eq!(
            clusters[0].question_ids,
            vec!["2-bulan_komunikasi_3", "2-bulan_komunikasi_1"]
        );
        assert_eq!(clusters[0].reason, "vocal");
        assert_eq!(clusters[0].cluster_id, "komunikasi_baby_1");
        // "4 Bulan" item was never mentioned and becomes a singleton.
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[1].question_ids, vec!["4-bulan_komunikasi_2"]);
        for cluster in &clusters {
            assert!(cluster.question_ids.contains(&cluster.canonical_id));
        }
    }

    #[test]
    fn members_are_claimed_once() {
        let qs = questions();
        let partitions = partition_questions(&qs);
        let raw = r#"{"clusters": [
            {"canonical_id": "2-bulan_komunikasi_1", "question_ids": ["2-bulan_komunikasi_1", "2-bulan_komunikasi_3"]},
            {"canonical_id": "2-bulan_komunikasi_3", "question_ids": ["2-bulan_komunikasi_3", "4-bulan_komunikasi_2"]}
        ]}"#;
        let mut seq = ClusterIdSequence::default();
        let clusters =
            resolve_clusters(interpret_response(Some(raw)).unwrap(), &partitions[0], &mut seq);
        let mut seen = HashSet::new();
        for cluster in &clusters {
            for id in &cluster.question_ids {
                assert!(seen.insert(id.clone()), "{id} appears twice");
            }
        }
        assert_eq!(clusters[1].canonical_id, "4-bulan_komunikasi_2");
    }

    #[test]
    fn missing_member_list_defaults_to_canonical() {
        let qs = questions();
        let partitions = partition_questions(&qs);
        let raw = r#"{"clusters": [{"canonical_id": "12-bulan_komunikasi_1"}]}"#;
        let mut seq = ClusterIdSequence::default();
        let clusters =
            resolve_clusters(interpret_response(Some(raw)).unwrap(), &partitions[1], &mut seq);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].question_ids, vec!["12-bulan_komunikasi_1"]);
    }

    #[test]
    fn cluster_ids_are_global() {
        let mut seq = ClusterIdSequence::default();
        assert_eq!(seq.next_id("Motorik Kasar", AgeCategory::Baby), "motorik_kasar_baby_1");
        assert_eq!(seq.next_id("Komunikasi", AgeCategory::Toddler), "komunikasi_toddler_2");
    }

    #[test]
    fn colliding_rows_yield_one_cluster_per_id() {
        let qs = vec![
            Question::new("2 Bulan", "Komunikasi", "1", "Tersenyum?", "Ya"),
            Question::new("2  bulan", "Komunikasi", "1", "Tersenyum lebar?", "Ya"),
            Question::new("2 Bulan", "Komunikasi", "2", "Tertawa?", "Ya"),
        ];
        let partitions = partition_questions(&qs);
        assert_eq!(partitions[0].ids(), vec!["2-bulan_komunikasi_1", "2-bulan_komunikasi_2"]);

        let raw = r#"{"clusters": [{"canonical_id": "2-bulan_komunikasi_2"}]}"#;
        let mut seq = ClusterIdSequence::default();
        let resolved =
            resolve_clusters(interpret_response(Some(raw)).unwrap(), &partitions[0], &mut seq);
        let holding = |clusters: &[Cluster]| {
            clusters
                .iter()
                .filter(|c| c.question_ids.iter().any(|id| id == "2-bulan_komunikasi_1"))
                .count()
        };
        assert_eq!(holding(&resolved), 1);
        assert_eq!(resolved.len(), 2);

        let fallback = fallback_clusters(&partitions[0], &mut seq);
        assert_eq!(holding(&fallback), 1);
        assert_eq!(fallback.len(), 2);
        assert_eq!(ClusterDocument::new("h", fallback).total_questions, 2);
    }

    struct ScriptedGrouping {
        replies: RefCell<Vec<anyhow::Result<Option<String>>>>,
        calls: Cell<usize>,
    }

    impl TextGenerator for ScriptedGrouping {
        fn complete(&self, _request: &CompletionRequest<'_>) -> anyhow::Result<Option<String>> {
            self.calls.set(self.calls.get() + 1);
            self.replies.borrow_mut().remove(0)
        }
    }

    #[test]
    fn later_attempt_can_succeed_after_mixed_failures() {
        let qs = vec![
            Question::new("2 Bulan", "Komunikasi", "1", "Tersenyum?", "Ya"),
            Question::new("2 Bulan", "Komunikasi", "2", "Tertawa?", "Ya"),
        ];
        let grouping = ScriptedGrouping {
            replies: RefCell::new(vec![
                Err(anyhow::anyhow!("503 service unavailable")),
                Ok(Some("here are your clusters".into())),
                Ok(Some(
                    r#"{"clusters": [{"canonical_id": "2-bulan_komunikasi_1",
                        "question_ids": ["2-bulan_komunikasi_1", "2-bulan_komunikasi_2"],
                        "reason": "both vocal"}]}"#
                        .into(),
                )),
            ]),
            calls: Cell::new(0),
        };
        let settings = ClusterSettings {
            retry_base_delay: Duration::ZERO,
            partition_delay: Duration::ZERO,
            ..ClusterSettings::default()
        };
        let engine = ClusteringEngine::new(&grouping, settings);
        let document = engine.build(&qs, "hash");

        assert_eq!(grouping.calls.get(), 3);
        assert_eq!(document.total_clusters, 1);
        let cluster = &document.clusters[0];
        assert_eq!(cluster.reason, "both vocal");
        assert_ne!(cluster.reason, FALLBACK_REASON);
        assert_eq!(cluster.question_ids.len(), 2);
    }

    #[test]
    fn retry_delay_doubles() {
        let settings = ClusterSettings::default();
        assert_eq!(settings.retry_delay(1), Duration::from_secs(2));
        assert_eq!(settings.retry_delay(2), Duration::from_secs(4));
        assert_eq!(settings.retry_delay(3), Duration::from_secs(8));
    }
}
