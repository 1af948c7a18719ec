//! Run orchestration: load, cluster when asked, process, summarize.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::clustering::ClusteringEngine;
use crate::controls::{GeneratorSettings, RunFlags};
use crate::llm::{ImageGenerator, TextGenerator};
use crate::pipeline::{preview, GenerationPipeline};
use crate::processor::{ProcessOptions, Processor, RunSummary};
use crate::questions::{load_questions, source_hash, Question};
use crate::store::{ClusterDocument, ClusterLookup, StorePaths};

const SAMPLE_SIZE: usize = 3;

/// Whether this run should (re)build `clusters.json`.
pub fn should_cluster(flags: &RunFlags, clusters_exist: bool) -> bool {
    if flags.dry_run {
        return false;
    }
    if flags.force_cluster {
        info!("force-cluster mode: will regenerate clusters.json");
        return true;
    }
    if flags.cluster_only {
        if clusters_exist {
            info!("clusters.json exists, use --force-cluster to regenerate");
            return false;
        }
        return true;
    }
    if !flags.skip_clustering && !clusters_exist {
        info!("no clusters.json found, running clustering");
        return true;
    }
    false
}

/// Executes one full run against the given capabilities.
///
/// A failure to load the CSV or to persist a run document is returned as an
/// error; per-question failures only show up in the summary.
pub fn run<T, I>(settings: &GeneratorSettings, text: T, image: I) -> Result<RunSummary>
where
    T: TextGenerator,
    I: ImageGenerator,
{
    let flags = &settings.flags;
    info!(csv = %settings.csv_path.display(), "loading questions");
    let questions = load_questions(&settings.csv_path).context("failed to load questions")?;
    info!(count = questions.len(), "loaded questions");

    let paths = StorePaths::new(&settings.output_dir);
    if !flags.dry_run {
        paths.ensure_dir()?;
    }

    let clusters_path = paths.clusters();
    if should_cluster(flags, clusters_path.exists()) {
        let hash = source_hash(&settings.csv_path)?;
        let engine = ClusteringEngine::new(&text, settings.clustering.clone());
        let document = engine.build(&questions, &hash);
        document
            .save(&clusters_path)
            .context("failed to save clusters.json")?;
        info!(path = %clusters_path.display(), "saved clusters");
    }
    if flags.cluster_only {
        info!("clustering complete, exiting (--cluster-only mode)");
        return Ok(RunSummary::default());
    }

    let lookup = load_lookup(settings, &paths)?;

    let batch = limit(&questions, flags.limit);
    if flags.force {
        info!("force mode: will regenerate existing images");
    }
    if flags.dry_run {
        info!("dry-run mode: no API calls will be made");
    }
    log_sample(batch);

    let pipeline = GenerationPipeline::new(&text, &image, settings.pipeline.clone());
    let options = ProcessOptions {
        force: flags.force,
        dry_run: flags.dry_run,
    };
    let mut processor = Processor::open(paths, lookup, pipeline, options)?;
    let summary = processor.run_batch(batch)?;
    summary.log(flags.dry_run);
    Ok(summary)
}

fn load_lookup(settings: &GeneratorSettings, paths: &StorePaths) -> Result<ClusterLookup> {
    let Some(document) = ClusterDocument::load(&paths.clusters())? else {
        info!("no clusters.json found, will generate all images");
        return Ok(ClusterLookup::default());
    };
    info!(clusters = document.total_clusters, "loaded clusters.json");
    if !settings.flags.skip_clustering {
        let current = source_hash(&settings.csv_path)?;
        if document.is_stale(&current) {
            warn!(
                "csv file has changed since clusters.json was created, \
                 consider running with --force-cluster to regenerate"
            );
        }
    }
    Ok(document.lookup())
}

fn limit(questions: &[Question], limit: Option<usize>) -> &[Question] {
    match limit {
        Some(n) if n < questions.len() => {
            info!(limit = n, "limited batch");
            &questions[..n]
        }
        _ => questions,
    }
}

fn log_sample(questions: &[Question]) {
    info!("first {SAMPLE_SIZE} questions to process:");
    for (idx, q) in questions.iter().take(SAMPLE_SIZE).enumerate() {
        info!(
            "  {}. [{}] {} #{}: {}",
            idx + 1,
            q.age,
            q.domain,
            q.number,
            preview(&q.question_text, 50)
        );
    }
    if questions.len() > SAMPLE_SIZE {
        info!("  ... and {} more", questions.len() - SAMPLE_SIZE);
    }
}
