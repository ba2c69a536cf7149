//! pawpair server
//!
//! Run with: cargo run --bin pawpair
//!
//! Configuration comes from `--config` or the default search path, then
//! environment overrides (`PAWPAIR_BACKEND_URL`, `PAWPAIR_BACKEND_KEY`,
//! `PAWPAIR_API_PORT`, ...). `RUST_LOG` overrides the configured log level.

use clap::Parser;
use pawpair::api::{serve, AppState};
use pawpair::backend::shared;
use pawpair::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pawpair")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Shared checklist and virtual cat server")]
struct Args {
    /// Config file (default: search the usual locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the config
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(port) = args.port {
        config.api.port = port;
    }

    pawpair::logging::init(&config.logging);
    tracing::info!("Starting pawpair v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;

    let backend = shared::init(&config.backend)?;
    tracing::info!(backend = backend.name(), "Backend bound");

    match backend.health_check().await {
        Ok(()) => tracing::info!("Backend reachable"),
        Err(e) => tracing::warn!(error = %e, "Backend not reachable yet, views will retry on every poll"),
    }

    tracing::info!(
        default_room = %config.rooms.default_room,
        tasks_ms = config.polling.tasks_ms,
        pet_ms = config.polling.pet_ms,
        coins_ms = config.polling.coins_ms,
        "Polling configured"
    );

    let state = AppState::new(config, backend);
    serve(state).await?;

    tracing::info!("pawpair stopped");
    Ok(())
}
