//! `clipweave-server`: runs the Composition Service (C8) over HTTP.

use std::sync::Arc;

use clipweave::config::AppConfig;
use clipweave::enhancer::Enhancer;
use clipweave::fetcher::Fetcher;
use clipweave::orchestrator::Orchestrator;
use clipweave::server::{self, AppState};
use clipweave::Catalog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    gstreamer::init()?;

    let config = Arc::new(AppConfig::load()?);

    if config.verify_encoder_on_init {
        verify_encoder()?;
    }

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

    let orchestrator = Arc::new(Orchestrator::new(catalog.clone(), fetcher, enhancer, config.clone()));

    let state = AppState { catalog, orchestrator, config: config.clone() };
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "clipweave-server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn verify_encoder() -> anyhow::Result<()> {
    if gstreamer::ElementFactory::find("x264enc").is_none() {
        anyhow::bail!("required GStreamer element x264enc is not installed");
    }
    Ok(())
}
