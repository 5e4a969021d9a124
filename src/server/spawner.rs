// src/server/spawner.rs

//! Spawns all of the daemon's long-running background tasks against the
//! shared `Core`, each on its own shutdown subscription so a single
//! broadcast on `ctx.shutdown_tx` drains every one of them.

use super::context::ServerContext;
use super::metrics_server;
use std::time::Duration;
use tracing::info;

/// Spawns every background task into `ctx.background_tasks`. Called once,
/// after `initialization::setup` and before the HTTP server starts serving.
pub async fn spawn_all(ctx: &mut ServerContext) {
    let core = &ctx.core;
    let shutdown_tx = &ctx.shutdown_tx;
    let tasks = &mut ctx.background_tasks;

    // --- Metrics server ---
    if core.config.metrics.enabled {
        let port = core.config.metrics.port;
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            metrics_server::run_metrics_server(port, shutdown_rx).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Audit logger flush ticker ---
    {
        let audit = core.audit.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            audit.run(shutdown_rx).await;
            Ok(())
        });
    }

    // --- Session cleanup ticker ---
    {
        let sessions = core.sessions.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            sessions.run(shutdown_rx).await;
            Ok(())
        });
    }

    // --- Upload scratch sweep ticker ---
    {
        let upload = core.upload.clone();
        let interval = Duration::from_secs(core.config.upload.sweep_interval_secs);
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            upload.run(interval, shutdown_rx).await;
            Ok(())
        });
    }

    // --- Cluster manager heartbeat ticker ---
    if let Some(cluster) = &core.cluster {
        let cluster = cluster.clone();
        let hub = core.hub.clone();
        let audit = core.audit.clone();
        let interval = Duration::from_secs(core.config.cluster.ping_interval_secs);
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            cluster.run(hub, audit, interval, shutdown_rx).await;
            Ok(())
        });
    }

    // --- Pool heartbeats, one task per detected ZFS pool ---
    for heartbeat in &core.heartbeats {
        let heartbeat = heartbeat.clone();
        let exec = core.exec.clone();
        let hub = core.hub.clone();
        let audit = core.audit.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            heartbeat.run(exec, hub, audit, shutdown_rx).await;
            Ok(())
        });
    }

    // --- inotify watch-usage monitor ---
    {
        let monitor = core.inotify_monitor.clone();
        let hub = core.hub.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            monitor.run(hub, shutdown_rx).await;
            Ok(())
        });
    }

    // --- Capacity guardian ---
    {
        let guardian = core.capacity_guardian.clone();
        let exec = core.exec.clone();
        let hub = core.hub.clone();
        let audit = core.audit.clone();
        let interval = Duration::from_secs(core.config.monitors.capacity_interval_secs);
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            guardian.run(exec, hub, audit, interval, shutdown_rx).await;
            Ok(())
        });
    }

    // --- Embedded store checkpoint + daily backup ticker ---
    {
        let store = core.store.clone();
        let checkpoint_interval = Duration::from_secs(core.config.audit.checkpoint_interval_secs);
        let backup_interval = Duration::from_secs(core.config.audit.backup_interval_secs);
        let backup_path = core.config.resolved_backup_path();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            let mut checkpoint_ticker = tokio::time::interval(checkpoint_interval);
            let mut backup_ticker = tokio::time::interval(backup_interval);
            loop {
                tokio::select! {
                    _ = checkpoint_ticker.tick() => {
                        if let Err(e) = store.checkpoint().await {
                            tracing::error!(error = %e, "periodic store checkpoint failed");
                        }
                    }
                    _ = backup_ticker.tick() => {
                        if let Err(e) = store.backup_to(backup_path.clone()).await {
                            tracing::error!(error = %e, path = %backup_path, "periodic store backup failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            Ok(())
        });
    }

    info!(task_count = tasks.len(), "all background tasks spawned");
}
