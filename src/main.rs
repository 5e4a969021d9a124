// src/main.rs

//! The main entry point for the D-PlaneOS control daemon.

use anyhow::Result;
use clap::Parser;
use dplaneosd::config::{Cli, Config};
use dplaneosd::server;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    // Reloadable filter so `RUST_LOG` env or config `log_level` can be
    // changed without a restart; no handler currently exposes this, but the
    // layer costs nothing idle and matches the daemon's other long-running
    // reload-capable infrastructure (network reconciliation, cluster role).
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();
    drop(reload_handle);

    if let Err(e) = server::run(config).await {
        error!("daemon exited with a fatal error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
