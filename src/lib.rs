#![warn(missing_docs)]
//! Resumable batch illustration generator for ASQ-3 screening questions.
//!
//! Every question read from the CSV source gets one PNG. Images are produced by
//! a prompt model followed by an image model, but only when no cheaper shortcut
//! applies: questions already completed are skipped, members of a visual
//! cluster reuse their canonical image and identical texts reuse each other.

pub mod age;
pub mod app;
pub mod clustering;
pub mod controls;
pub mod error;
pub mod identity;
pub mod llm;
pub mod pipeline;
pub mod processor;
pub mod questions;
pub mod store;

pub use age::AgeCategory;
pub use app::run as run_generator;
pub use clustering::{ClusterSettings, ClusteringEngine};
pub use controls::{Cli, GeneratorSettings, RunFlags};
pub use error::{ClusterResponseError, GenerationError, LoadError, StoreError};
pub use identity::{output_filename, question_id, QuestionId};
pub use llm::{ImageGenerator, OpenAiClient, TextGenerator};
pub use pipeline::{GenerationPipeline, PipelineSettings};
pub use processor::{Decision, Outcome, ProcessOptions, Processor, RunSummary};
pub use questions::{load_questions, Question};
pub use store::{Checkpoint, ClusterDocument, ClusterLookup, ErrorLog, StorePaths};
