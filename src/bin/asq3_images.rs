use anyhow::{Context, Result};
use asq3_imagegen::{run_generator, Cli, OpenAiClient};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("{err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings = cli.build_settings();
    info!(
        base_url = %settings.endpoint.base_url,
        prompt_model = %settings.pipeline.prompt_model,
        image_model = %settings.pipeline.image_model,
        "starting ASQ-3 image generation"
    );

    let client = OpenAiClient::new(
        &settings.endpoint.base_url,
        settings.endpoint.api_key.as_deref(),
        settings.endpoint.timeout,
    )
    .context("failed to initialize LLM client")?;

    let summary = run_generator(&settings, &client, &client)?;
    Ok(summary.exit_code())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
