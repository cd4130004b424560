//! # Integration Bus Server
//!
//! Loads layered configuration, boots the bus with its configured storage and
//! delivery client, runs the dispatcher and health monitor, and shuts down
//! cleanly on Ctrl-C.

use anyhow::Context;
use clap::Parser;
use integration_bus::config::ConfigManager;
use integration_bus::logging::init_structured_logging;
use integration_bus::IntegrationBus;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "integration-bus")]
#[command(about = "Run the module-integration event bus")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment overlay; defaults to BUS_ENV / APP_ENV / development
    #[arg(short, long)]
    environment: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_structured_logging();

    let environment = cli
        .environment
        .unwrap_or_else(ConfigManager::detect_environment);
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir, &environment)
        .context("loading bus configuration")?;

    let bus = IntegrationBus::bootstrap(manager.config().clone())
        .await
        .context("bootstrapping integration bus")?;
    info!(
        environment = %manager.environment(),
        modules = bus.modules().len(),
        rules = bus.rules().len(),
        queued = bus.queue_len(),
        "Integration bus bootstrapped"
    );

    let handle = bus.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    handle.shutdown().await.context("shutting down bus")?;
    let stats = bus.stats();
    info!(
        rounds = stats.rounds,
        delivered = stats.delivered,
        partial = stats.partial,
        abandoned = stats.abandoned,
        "Integration bus stopped"
    );
    Ok(())
}
