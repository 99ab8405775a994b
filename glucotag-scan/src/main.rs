//! glucotag-scan - main entry point
//!
//! Runs the acquisition pipeline against simulated tag hardware and serves
//! the control API. The memory image comes from `--memory-image` (hex dump
//! or scan log JSON); without one a synthetic 120 mg/dL image is served.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use glucotag_common::config::{default_config_path, RootFolderInitializer, RootFolderResolver};
use glucotag_common::events::EventBus;
use glucotag_scan::api::{self, AppState};
use glucotag_scan::config::TomlConfig;
use glucotag_scan::tag::{MemoryImage, SimulatedHardware};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MODULE_NAME: &str = "glucotag";

/// Command-line arguments for glucotag-scan
#[derive(Parser, Debug)]
#[command(name = "glucotag-scan")]
#[command(about = "Glucose sensor tag acquisition service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "GLUCOTAG_CONFIG")]
    config: Option<PathBuf>,

    /// Data folder holding ScanLogs/ and calibration.json
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "GLUCOTAG_PORT")]
    port: Option<u16>,

    /// Memory image served by the simulated tag (.json scan log or hex dump)
    #[arg(short, long, env = "GLUCOTAG_MEMORY_IMAGE")]
    memory_image: Option<PathBuf>,

    /// Probability that a simulated block read fails
    #[arg(long, default_value_t = 0.0)]
    read_failure_rate: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| default_config_path(MODULE_NAME))
        .unwrap_or_else(|| PathBuf::from("glucotag.toml"));

    // Parse errors surface after the subscriber is up so they get logged too
    let loaded = TomlConfig::load(&config_path);
    let log_level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("glucotag_scan={0},glucotag_common={0},tower_http=info", log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "glucotag-scan v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );

    let config = loaded.with_context(|| format!("Failed to load {}", config_path.display()))?;

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_config_value(config.root_folder.clone())
        .resolve();
    let folders = RootFolderInitializer::new(root_folder);
    folders
        .ensure_directory_exists()
        .context("Failed to create data folder")?;
    info!("Data folder: {}", folders.root().display());

    let image = match &args.memory_image {
        Some(path) => MemoryImage::load(path)
            .with_context(|| format!("Failed to load memory image {}", path.display()))?,
        None => {
            info!("No memory image given, serving a synthetic sensor");
            MemoryImage::synthetic(1200, 4, 0, 10_000)
        }
    };
    let hardware = Arc::new(
        SimulatedHardware::builder(image)
            .read_failure_rate(args.read_failure_rate)
            .build(),
    );

    let events = EventBus::default();
    let state = AppState::assemble(hardware, &folders, config.controller_config(), events).await;
    let app = api::create_router(state);

    let port = args.port.unwrap_or(config.port);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("glucotag-scan stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
