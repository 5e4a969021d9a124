// src/server/connection_loop.rs

//! Serves the HTTP router built in `server::router` over `ctx.listener`
//! until a shutdown signal arrives, then waits for every background task
//! spawned by `spawner::spawn_all` to drain.

use super::context::ServerContext;
use super::router;
use std::time::Duration;
use tracing::{error, info, warn};

#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Waits for a shutdown signal based on the operating system.
/// On Unix, it listens for SIGINT and SIGTERM.
/// On Windows, it listens for Ctrl+C.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("failed to register Ctrl+C handler");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, initiating graceful shutdown"); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, initiating graceful shutdown"); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await.ok(); info!("Ctrl-C received, initiating graceful shutdown"); } } => {},
    }
}

/// The main server loop: serves HTTP until shutdown is requested, either by
/// an OS signal or by a background task failing, then drains every other
/// background task with a bounded grace period.
pub async fn run(mut ctx: ServerContext) {
    let app = router::build(ctx.core.clone())
        .into_make_service_with_connect_info::<std::net::SocketAddr>();

    let shutdown_tx = ctx.shutdown_tx.clone();
    let mut serve_shutdown_rx = shutdown_tx.subscribe();

    let serve = axum::serve(ctx.listener, app).with_graceful_shutdown(async move {
        serve_shutdown_rx.recv().await.ok();
    });

    tokio::select! {
        biased;

        _ = await_shutdown_signal() => {
            info!("shutdown signal received");
        }

        Some(res) = ctx.background_tasks.join_next() => {
            match res {
                Ok(Ok(())) => warn!("a background task exited unexpectedly; shutting down"),
                Ok(Err(e)) => error!(error = %e, "a background task failed; shutting down"),
                Err(e) => error!(error = %e, "a background task panicked; shutting down"),
            }
        }

        res = serve => {
            if let Err(e) = res {
                error!(error = %e, "HTTP server exited with an error");
            }
        }
    }

    info!("broadcasting shutdown to all background tasks");
    if shutdown_tx.send(()).is_err() {
        warn!("no background tasks were listening for the shutdown signal");
    }

    info!("waiting for background tasks to finish");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("timed out waiting for background tasks to finish cleanly");
    }

    info!("server shutdown complete");
}
