//! The tessera daemon: load config, wire the signer, serve sentries.

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use tessera_core::infrastructure::config::load_config;
use tessera_core::infrastructure::logging::init_logger;
use tessera_service::setup::start_from_config;
use tokio::sync::watch;

#[derive(Debug, Parser)]
#[command(name = "tesserad", about = "Threshold remote signer for Tendermint-style validators", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "tessera.toml")]
    config: PathBuf,

    /// Log filter, e.g. "info" or "debug,tessera_service=trace".
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for rolling log files (console-only when unset).
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.log_dir.as_deref(), &cli.log_level);

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load configuration {}: {}", cli.config.display(), err);
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = match start_from_config(&config, shutdown_rx).await {
        Ok(tasks) => tasks,
        Err(err) => {
            error!("failed to start signer: {}", err);
            return ExitCode::FAILURE;
        }
    };

    info!("tesserad started sign_mode={} chain_nodes={}", config.sign_mode, config.chain_nodes.len());

    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to install signal handler");
    }
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        let _ = task.await;
    }
    info!("tesserad stopped");
    ExitCode::SUCCESS
}
