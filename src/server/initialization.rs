// src/server/initialization.rs

//! Orders the daemon's startup phases: open the store, assemble the Core
//! aggregate, run the one-shot network reconciler, bind the listener.
//! Any failure here is a fatal init error and exits the process non-zero.

use super::context::{Core, ServerContext};
use crate::config::Config;
use crate::core::audit::AuditLogger;
use crate::core::auth::SessionManager;
use crate::core::auth::rate_limit::RateLimiter;
use crate::core::cluster::ClusterManager;
use crate::core::clients::docker::DockerClient;
use crate::core::clients::netlink::NetlinkClient;
use crate::core::clients::network_units::NetworkUnitWriter;
use crate::core::exec::{CommandExecutor, ExecClass};
use crate::core::hub::Hub;
use crate::core::monitors::capacity::CapacityGuardian;
use crate::core::monitors::inotify::InotifyMonitor;
use crate::core::monitors::pool_heartbeat::PoolHeartbeat;
use crate::core::network::reconciler;
use crate::core::rbac;
use crate::core::store::Store;
use crate::core::upload::UploadManager;
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Runs every startup phase in order, producing a ready-to-serve context.
pub async fn setup(config: Config) -> Result<ServerContext> {
    let (shutdown_tx, _) = broadcast::channel(4);

    let store = Store::open(&config.db_path)
        .await
        .map_err(|e| anyhow!("opening embedded store at '{}': {e}", config.db_path))?;
    rbac::seed_default_rbac(&store)
        .await
        .context("seeding default RBAC permissions")?;

    let audit = Arc::new(
        AuditLogger::new(store.clone(), config.audit.clone(), &config.audit_key_path())
            .await
            .context("initializing audit logger")?,
    );

    let exec = CommandExecutor::new(config.exec.clone());
    let docker = DockerClient::new(config.docker_socket.clone());

    let netlink = NetlinkClient::connect().context("opening netlink socket (needs CAP_NET_ADMIN)")?;
    let unit_writer = NetworkUnitWriter::new(config.config_dir.clone(), exec.clone());

    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        config.auth.session_ttl_secs,
        Duration::from_secs(config.auth.session_cleanup_interval_secs),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(&config.auth));
    let hub = Hub::new();
    let upload = Arc::new(UploadManager::new(
        config.upload.scratch_dir.clone(),
        Duration::from_secs(config.upload.chunk_timeout_secs),
    ));

    let cluster = if config.cluster.enabled {
        let manager = ClusterManager::new(
            config.cluster.node_id.clone(),
            config.listen.clone(),
            env!("CARGO_PKG_VERSION").to_string(),
            store.clone(),
        )
        .await
        .context("initializing cluster manager")?;
        info!(node_id = %config.cluster.node_id, "cluster mode enabled");
        Some(Arc::new(manager))
    } else {
        info!("cluster mode disabled; running standalone");
        None
    };

    let pools = discover_pools(&exec).await;
    let heartbeats: Vec<Arc<PoolHeartbeat>> = pools
        .iter()
        .map(|(name, mount)| {
            Arc::new(PoolHeartbeat::new(
                name.clone(),
                mount.clone(),
                Duration::from_secs(config.monitors.heartbeat_interval_secs),
            ))
        })
        .collect();
    if heartbeats.is_empty() {
        warn!("no ZFS pools detected at startup; heartbeat monitor has nothing to watch");
    }

    let inotify_monitor = Arc::new(InotifyMonitor::new(Duration::from_secs(
        config.monitors.inotify_interval_secs,
    )));
    let capacity_guardian = Arc::new(CapacityGuardian::new(
        pools.iter().map(|(name, _)| name.clone()).collect(),
        config.monitors.warning_threshold_pct,
        config.monitors.critical_threshold_pct,
        None,
    ));

    let core = Arc::new(Core {
        config: config.clone(),
        store,
        audit,
        exec,
        docker,
        netlink,
        unit_writer,
        sessions,
        rate_limiter,
        hub,
        cluster,
        upload,
        heartbeats,
        inotify_monitor,
        capacity_guardian,
    });

    run_reconciler(&core).await;

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding HTTP listener on '{}'", config.listen))?;
    info!(listen = %config.listen, "D-PlaneOS control daemon listening");

    Ok(ServerContext {
        core,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Runs the network reconciler once at startup after the store's migrations
/// and before the listener is bound. Errors restoring individual items are
/// logged and do not abort the pass; a pass with nothing to restore is a
/// silent no-op.
async fn run_reconciler(core: &Core) {
    match reconciler::reconcile(&core.store, &core.netlink, &core.unit_writer).await {
        Ok(restored) if restored > 0 => info!(restored, "network reconciliation restored missing state"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "network reconciliation pass failed"),
    }
}

/// Lists importable pools via `zpool list -H -o name,mountpoint`, one
/// heartbeat instance per detected pool. A discovery failure (no
/// `zpool` binary, no pools) is not fatal — the heartbeat set is just empty.
async fn discover_pools(exec: &CommandExecutor) -> Vec<(String, std::path::PathBuf)> {
    let output = match exec.run(ExecClass::Fast, "zpool", &["list", "-H", "-o", "name,mountpoint"]).await {
        Ok(out) if out.success() => out.combined_output,
        Ok(out) => {
            warn!(output = %out.combined_output, "zpool list exited non-zero during pool discovery");
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "pool discovery failed; heartbeat monitor will watch nothing");
            return Vec::new();
        }
    };

    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let mount = parts.next()?;
            if mount == "-" || mount == "none" {
                return None;
            }
            Some((name.to_string(), std::path::PathBuf::from(mount)))
        })
        .collect()
}
