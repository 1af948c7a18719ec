//! Command-line flags and the run settings derived from them.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::clustering::ClusterSettings;
use crate::pipeline::PipelineSettings;

/// Switches that steer one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// Regenerate images that already exist.
    pub force: bool,
    /// Process at most this many questions.
    pub limit: Option<usize>,
    /// Report what would be generated without calling any API.
    pub dry_run: bool,
    /// Build clusters, then stop.
    pub cluster_only: bool,
    /// Never build clusters; use `clusters.json` when present.
    pub skip_clustering: bool,
    /// Rebuild `clusters.json` even if it exists.
    pub force_cluster: bool,
}

/// Where the OpenAI-compatible backend lives and how to reach it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointSettings {
    /// Base URL ending in the API version, e.g. `http://127.0.0.1:8045/v1`.
    pub base_url: String,
    /// Bearer token, when the backend requires one.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Everything the application driver needs, independent of how it was parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorSettings {
    /// Source CSV.
    pub csv_path: PathBuf,
    /// Directory receiving images and the JSON documents.
    pub output_dir: PathBuf,
    /// Run switches.
    pub flags: RunFlags,
    /// Backend connection.
    pub endpoint: EndpointSettings,
    /// Prompt and image generation.
    pub pipeline: PipelineSettings,
    /// Clustering pass.
    pub clustering: ClusterSettings,
}

/// Command-line interface of the `asq3-images` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "asq3-images",
    about = "Generate one illustration per ASQ-3 screening question"
)]
pub struct Cli {
    /// Regenerate existing images (overwrite)
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Limit number of questions to process
    #[arg(long)]
    pub limit: Option<usize>,

    /// Show what would be generated without calling the API
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Run semantic clustering without generating images
    #[arg(long, default_value_t = false)]
    pub cluster_only: bool,

    /// Use existing clusters.json, don't regenerate
    #[arg(long, default_value_t = false)]
    pub skip_clustering: bool,

    /// Regenerate clusters.json even if it exists
    #[arg(long, default_value_t = false)]
    pub force_cluster: bool,

    /// Question source CSV
    #[arg(long, env = "ASQ3_CSV", default_value = "asq3.csv")]
    pub csv: PathBuf,

    /// Output directory for images, checkpoint, error log and clusters
    #[arg(
        long,
        env = "ASQ3_OUTPUT_DIR",
        default_value = "storage/app/public/asq3-images"
    )]
    pub output_dir: PathBuf,

    /// OpenAI-compatible base URL
    #[arg(long, env = "LLM_BASE_URL", default_value = "http://127.0.0.1:8045/v1")]
    pub llm_base_url: String,

    /// API key sent as a bearer token
    #[arg(long, env = "LLM_API_KEY")]
    pub llm_api_key: Option<String>,

    /// Model used for prompt synthesis and clustering
    #[arg(long, env = "PROMPT_MODEL", default_value = "gpt-4o")]
    pub prompt_model: String,

    /// Model used for image synthesis
    #[arg(long, env = "IMAGE_MODEL", default_value = "dall-e-3")]
    pub image_model: String,

    /// Milliseconds to sleep after each remote call and each clustering partition
    #[arg(long, env = "ASQ3_PACING_MS", default_value_t = 1500)]
    pub pacing_ms: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "LLM_TIMEOUT_SECS", default_value_t = 120)]
    pub timeout_secs: u64,
}

impl Cli {
    /// Converts the parsed CLI into `GeneratorSettings`.
    pub fn build_settings(&self) -> GeneratorSettings {
        let pacing = Duration::from_millis(self.pacing_ms);
        GeneratorSettings {
            csv_path: self.csv.clone(),
            output_dir: self.output_dir.clone(),
            flags: RunFlags {
                force: self.force,
                limit: self.limit.filter(|limit| *limit > 0),
                dry_run: self.dry_run,
                cluster_only: self.cluster_only,
                skip_clustering: self.skip_clustering,
                force_cluster: self.force_cluster,
            },
            endpoint: EndpointSettings {
                base_url: self.llm_base_url.trim().to_string(),
                api_key: self
                    .llm_api_key
                    .as_deref()
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string),
                timeout: Duration::from_secs(self.timeout_secs),
            },
            pipeline: PipelineSettings {
                prompt_model: self.prompt_model.clone(),
                image_model: self.image_model.clone(),
                call_delay: pacing,
                ..PipelineSettings::default()
            },
            clustering: ClusterSettings {
                model: self.prompt_model.clone(),
                partition_delay: pacing,
                ..ClusterSettings::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_layout() {
        let cli = Cli::parse_from(["asq3-images"]);
        let settings = cli.build_settings();
        assert_eq!(settings.csv_path, PathBuf::from("asq3.csv"));
        assert_eq!(
            settings.output_dir,
            PathBuf::from("storage/app/public/asq3-images")
        );
        assert_eq!(settings.pipeline.call_delay, Duration::from_millis(1500));
        assert_eq!(settings.clustering.attempts, 3);
        assert_eq!(settings.endpoint.timeout, Duration::from_secs(120));
    }

    #[test]
    fn flags_and_models_flow_through() {
        let cli = Cli::parse_from([
            "asq3-images",
            "--force",
            "--limit",
            "10",
            "--dry-run",
            "--prompt-model",
            "local-text",
            "--llm-api-key",
            "  ",
        ]);
        let settings = cli.build_settings();
        assert!(settings.flags.force);
        assert!(settings.flags.dry_run);
        assert_eq!(settings.flags.limit, Some(10));
        assert_eq!(settings.clustering.model, "local-text");
        assert_eq!(settings.pipeline.prompt_model, "local-text");
        assert_eq!(settings.endpoint.api_key, None);
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let cli = Cli::parse_from(["asq3-images", "--limit", "0"]);
        assert_eq!(cli.build_settings().flags.limit, None);
    }
}
