// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod handlers;
mod initialization;
mod metrics_server;
mod middleware;
mod router;
mod spawner;

pub use context::Core;

/// Runs every startup phase, spawns background tasks, then serves HTTP
/// until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let mut server_context = initialization::setup(config).await?;
    spawner::spawn_all(&mut server_context).await;
    connection_loop::run(server_context).await;
    Ok(())
}
