//! Per-question decision cascade and the batch loop around it.
//!
//! For each question a [`Decision`] is computed from the checkpoint, the cluster
//! lookup and the output directory alone. Executing it performs at most one
//! state change, which is persisted before the next question starts.

use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::identity::output_filename;
use crate::llm::{ImageGenerator, TextGenerator};
use crate::pipeline::GenerationPipeline;
use crate::questions::Question;
use crate::store::checkpoint::CheckpointStore;
use crate::store::{copy_atomic, write_atomic, ClusterLookup, ErrorLog, StorePaths};

/// Run-wide switches that alter the cascade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Regenerate completed questions and bypass the content-duplicate shortcut.
    pub force: bool,
    /// Report what would be generated without touching disk or network.
    pub dry_run: bool,
}

/// What should happen to one question, first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Already completed.
    Skip,
    /// Dry-run projection.
    DryRun,
    /// Copy the canonical member's image.
    ClusterCopy {
        /// Cluster representative whose file is copied.
        canonical_id: String,
    },
    /// Copy the image already generated for identical text.
    ContentCopy {
        /// Existing file inside the output directory.
        source_filename: String,
    },
    /// Call the pipeline.
    Generate,
}

/// Result of executing a [`Decision`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Left untouched.
    Skipped,
    /// Counted as a projected generation.
    DryRun,
    /// Copied from the cluster canonical.
    ClusterCopied,
    /// Copied from an identical question.
    Duplicated,
    /// Freshly generated.
    Generated,
    /// Recorded in the error log.
    Failed(String),
}

/// Aggregate counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Images freshly generated.
    pub generated: usize,
    /// Questions already completed.
    pub skipped: usize,
    /// Copies made because the text matched.
    pub duplicates: usize,
    /// Copies made from a cluster canonical.
    pub cluster_copies: usize,
    /// Dry-run projections.
    pub dry_run: usize,
    /// Failures written to the error log.
    pub errors: usize,
    /// Questions in the batch.
    pub total: usize,
}

impl RunSummary {
    /// Counts one outcome.
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Skipped => self.skipped += 1,
            Outcome::DryRun => self.dry_run += 1,
            Outcome::ClusterCopied => self.cluster_copies += 1,
            Outcome::Duplicated => self.duplicates += 1,
            Outcome::Generated => self.generated += 1,
            Outcome::Failed(_) => self.errors += 1,
        }
    }

    /// Process exit status: 0 when nothing failed.
    pub fn exit_code(&self) -> i32 {
        if self.errors == 0 {
            0
        } else {
            1
        }
    }

    /// Emits the end-of-run summary.
    pub fn log(&self, dry_run: bool) {
        info!(
            total = self.total,
            generated = self.generated,
            cluster_copies = self.cluster_copies,
            duplicates = self.duplicates,
            skipped = self.skipped,
            errors = self.errors,
            "run complete"
        );
        if dry_run {
            info!(would_generate = self.dry_run, "dry run, nothing was written");
        }
    }
}

/// Owns the run state: the documents, the cluster lookup and the pipeline.
pub struct Processor<T, I> {
    paths: StorePaths,
    checkpoint: CheckpointStore,
    errors: ErrorLog,
    lookup: ClusterLookup,
    pipeline: GenerationPipeline<T, I>,
    options: ProcessOptions,
}

impl<T: TextGenerator, I: ImageGenerator> Processor<T, I> {
    /// Opens the checkpoint under `paths` and binds the error log next to it.
    pub fn open(
        paths: StorePaths,
        lookup: ClusterLookup,
        pipeline: GenerationPipeline<T, I>,
        options: ProcessOptions,
    ) -> Result<Self, StoreError> {
        let checkpoint = CheckpointStore::open(paths.checkpoint())?;
        let errors = ErrorLog::new(paths.errors());
        Ok(Self {
            paths,
            checkpoint,
            errors,
            lookup,
            pipeline,
            options,
        })
    }

    /// Checkpoint state as of the last persisted change.
    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Error log handle.
    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    /// Computes the shortcut that applies to `question` without side effects.
    pub fn decide(&self, question: &Question) -> Decision {
        let id = question.id();
        let data = self.checkpoint.data();

        if data.is_completed(id.as_str()) && !self.options.force {
            return Decision::Skip;
        }
        if self.options.dry_run {
            return Decision::DryRun;
        }
        if let Some(canonical) = self.lookup.copy_source(id.as_str()) {
            if self.paths.output_file(&output_filename(canonical)).exists() {
                return Decision::ClusterCopy {
                    canonical_id: canonical.to_string(),
                };
            }
            info!(
                question_id = %id,
                "canonical image {canonical} not yet generated, will generate this one"
            );
        }
        if !self.options.force {
            if let Some(source) = data.hash_source(&question.content_hash()) {
                if self.paths.output_file(source).exists() {
                    return Decision::ContentCopy {
                        source_filename: source.to_string(),
                    };
                }
            }
        }
        Decision::Generate
    }

    /// Decides and executes for one question.
    ///
    /// Per-question failures come back as [`Outcome::Failed`]; an `Err` means the
    /// checkpoint or the error log itself could not be persisted.
    pub fn process(&mut self, question: &Question) -> Result<Outcome, StoreError> {
        let id = question.id();
        let filename = id.output_filename();
        match self.decide(question) {
            Decision::Skip => {
                info!(question_id = %id, "skipping, already completed");
                Ok(Outcome::Skipped)
            }
            Decision::DryRun => {
                info!(question_id = %id, "dry run, would generate {filename}");
                Ok(Outcome::DryRun)
            }
            Decision::ClusterCopy { canonical_id } => {
                let source = self.paths.output_file(&output_filename(&canonical_id));
                let target = self.paths.output_file(&filename);
                if let Err(err) = copy_atomic(&source, &target) {
                    return self.fail(id.as_str(), &format!("cluster copy failed: {err}"));
                }
                self.checkpoint
                    .update(|cp| cp.record_cluster_copy(id.as_str(), &canonical_id))?;
                info!(question_id = %id, "cluster copy from {canonical_id}");
                Ok(Outcome::ClusterCopied)
            }
            Decision::ContentCopy { source_filename } => {
                let source = self.paths.output_file(&source_filename);
                let target = self.paths.output_file(&filename);
                if let Err(err) = copy_atomic(&source, &target) {
                    return self.fail(id.as_str(), &format!("duplicate copy failed: {err}"));
                }
                self.checkpoint
                    .update(|cp| cp.record_duplicate(id.as_str(), &source_filename))?;
                info!(question_id = %id, "duplicate detected, copied from {source_filename}");
                Ok(Outcome::Duplicated)
            }
            Decision::Generate => self.generate(question, id.as_str(), &filename),
        }
    }

    fn generate(
        &mut self,
        question: &Question,
        id: &str,
        filename: &str,
    ) -> Result<Outcome, StoreError> {
        let bytes = match self.pipeline.generate(
            &question.question_text,
            &question.age,
            &question.domain,
            id,
        ) {
            Ok(bytes) => bytes,
            Err(err) => return self.fail(id, &err.to_string()),
        };

        let target = self.paths.output_file(filename);
        if let Err(err) = write_atomic(&target, &bytes) {
            return self.fail(id, &format!("failed to write image: {err}"));
        }

        let hash = question.content_hash();
        let replace_stale = self
            .checkpoint
            .data()
            .hash_source(&hash)
            .is_some_and(|recorded| !self.paths.output_file(recorded).exists());
        self.checkpoint
            .update(|cp| cp.record_generated(id, &hash, filename, replace_stale))?;
        info!(question_id = id, bytes = bytes.len(), "saved {filename}");
        Ok(Outcome::Generated)
    }

    fn fail(&self, id: &str, message: &str) -> Result<Outcome, StoreError> {
        error!(question_id = id, error = message, "question failed");
        self.errors.append(id, message)?;
        Ok(Outcome::Failed(message.to_string()))
    }

    /// Processes every question in order, isolating per-question failures.
    pub fn run_batch(&mut self, questions: &[Question]) -> Result<RunSummary, StoreError> {
        let mut summary = RunSummary {
            total: questions.len(),
            ..RunSummary::default()
        };
        for (idx, question) in questions.iter().enumerate() {
            info!(
                "[{}/{}] processing {}",
                idx + 1,
                questions.len(),
                question.id()
            );
            let outcome = self.process(question)?;
            summary.record(&outcome);
        }
        if summary.errors > 0 {
            warn!(
                errors = summary.errors,
                log = %self.errors.path().display(),
                "some questions failed"
            );
        }
        Ok(summary)
    }
}
