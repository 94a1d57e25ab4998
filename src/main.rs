//! Eversense Zero - Main Entry Point
//!
//! Polls the Eversense cloud every few minutes and keeps the attached
//! display showing the latest glucose value and trend.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use eversense_zero::{
    acquisition::Acquisition,
    config::{AppPaths, Settings},
    display::LogDisplay,
    logging,
    storage::ReadingStore,
    sync::ApiClient,
};

/// Eversense CGM poller for small attached displays
#[derive(Debug, Parser)]
#[command(name = "eversense-zero", version, about)]
struct Cli {
    /// Enable debug logging output
    #[arg(short, long)]
    verbose: bool,

    /// Read settings from this file instead of the default config.ini
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single acquisition cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let paths = AppPaths::resolve(cli.config.clone());

    if let Err(e) = paths.create_dirs() {
        eprintln!("Failed to create {}: {}", paths.config_dir.display(), e);
        return ExitCode::FAILURE;
    }

    let settings = match Settings::load(&paths.config_file) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(&paths.log_dir, cli.verbose);
    info!("Eversense Zero starting...");

    match run(&cli, &paths, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, paths: &AppPaths, settings: Settings) -> Result<()> {
    let timezone = settings.timezone()?;
    let client = ApiClient::new(settings.auth.clone(), timezone, settings.request_timeout())?;
    let store = Arc::new(
        ReadingStore::open(&paths.database).context("failed to open reading store")?,
    );

    let mut acquisition = Acquisition::new(client, store, Box::new(LogDisplay));

    if cli.once {
        let outcome = acquisition.run_cycle().await;
        info!("Single cycle finished: {:?}", outcome);
        return Ok(());
    }

    tokio::select! {
        _ = acquisition.run() => {}
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
        }
    }

    acquisition.show_final_state().await;
    info!("Eversense Zero stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
