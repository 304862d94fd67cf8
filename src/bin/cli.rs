//! `clipweave-cli`: a thin wrapper around the shared pipeline for batch,
//! non-HTTP runs (spec.md §6 "CLI surface"). All core logic lives in the
//! library; this binary only parses flags and reports an exit code.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;

use clipweave::config::AppConfig;
use clipweave::enhancer::Enhancer;
use clipweave::fetcher::Fetcher;
use clipweave::model::JobStatus;
use clipweave::orchestrator::{JobRequest, Orchestrator};
use clipweave::Catalog;

#[derive(Parser, Debug)]
#[command(name = "clipweave-cli", about = "Generate a stitched video from a sentence")]
struct Cli {
    /// Sentence to compose into a video.
    #[arg(long)]
    text: String,

    /// Path to the SQLite clip catalog.
    #[arg(long)]
    database: Option<PathBuf>,

    /// Output filename (relative to --output-dir).
    #[arg(long)]
    output: Option<String>,

    /// Directory generated videos are written to.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,

    /// Skip text normalization diagnostics (normalization itself is always
    /// applied; this only silences the verbose normalization trace).
    #[arg(long)]
    no_normalize: bool,

    /// Keep job scratch files instead of deleting them on exit.
    #[arg(long)]
    no_cleanup: bool,

    #[arg(long)]
    enhance_audio: bool,

    #[arg(long, default_value_t = 10)]
    max_phrase_length: usize,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .init();
    }

    if let Err(e) = gstreamer::init() {
        eprintln!("failed to initialize media backend: {e}");
        std::process::exit(1);
    }

    match run(cli).await {
        Ok(JobStatus::Success) | Ok(JobStatus::PartialFailure) => std::process::exit(0),
        Ok(_) => std::process::exit(1),
        Err(e) => {
            eprintln!("clipweave-cli: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<JobStatus> {
    let mut config = AppConfig::load()?;
    if let Some(db) = cli.database {
        config.db_path = db;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if cli.no_cleanup {
        config.cleanup_temp_files = false;
    }
    let config = Arc::new(config);

    let catalog = Arc::new(Catalog::connect(&config.db_path).await?);
    let fetcher = Arc::new(Fetcher::new(
        config.credentials.clone(),
        config.temp_dir.join("fetch-cache"),
        config.fetch_timeout,
    ));
    let enhancer = config
        .auphonic_api_token
        .clone()
        .map(|token| Arc::new(Enhancer::new(token)));

    let orchestrator = Orchestrator::new(catalog, fetcher, enhancer, config.clone());

    let request = JobRequest {
        text: cli.text,
        max_phrase_length: cli.max_phrase_length,
        enhance_audio: cli.enhance_audio,
        ..JobRequest::default()
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let result = orchestrator.run(request, None, cancel).await?;

    if let Some(path) = &result.output_path {
        let destination = match &cli.output {
            Some(name) => config.output_dir.join(name),
            None => path.clone(),
        };
        if destination != *path {
            std::fs::copy(path, &destination)?;
        }
        println!("{}", destination.display());
    }

    if !result.missing_tokens.is_empty() {
        eprintln!("missing words: {}", result.missing_tokens.join(", "));
    }
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }

    Ok(result.status)
}
