// Warden daemon - supervises apps declared in a configuration file

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use warden::config;
use warden::error::Result;
use warden::manager::AppManager;

#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about = "Supervise long-running applications", long_about = None)]
struct Args {
    /// Path to the app configuration file (TOML or JSON)
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let specs = config::load_specs(&args.config)?;
    info!(
        "Loaded {} app(s) from {}",
        specs.len(),
        args.config.display()
    );

    let manager = AppManager::new();

    for spec in specs {
        let name = spec.name.clone();
        let handle = manager.add(spec).await?;
        if let Err(e) = handle.start().await {
            error!("Failed to start app '{}': {}", name, e);
        }
    }

    wait_for_shutdown().await;

    info!("Received shutdown signal, stopping all apps...");
    manager.shutdown().await;
    info!("Warden stopped");

    Ok(())
}

/// Block until SIGTERM or SIGINT arrives.
#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
