// src/server/context.rs

//! The daemon's "Core" aggregate: every long-lived component dependency-
//! injected at startup instead of living as a package-level mutable
//! singleton. One `Arc<Core>` is shared as axum state, handed to every
//! background task, and to the HTTP router.

use crate::config::Config;
use crate::core::audit::AuditLogger;
use crate::core::auth::SessionManager;
use crate::core::auth::rate_limit::RateLimiter;
use crate::core::cluster::ClusterManager;
use crate::core::clients::docker::DockerClient;
use crate::core::clients::netlink::NetlinkClient;
use crate::core::clients::network_units::NetworkUnitWriter;
use crate::core::exec::CommandExecutor;
use crate::core::hub::Hub;
use crate::core::monitors::capacity::CapacityGuardian;
use crate::core::monitors::inotify::InotifyMonitor;
use crate::core::monitors::pool_heartbeat::PoolHeartbeat;
use crate::core::store::Store;
use crate::core::upload::UploadManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Every component the HTTP handlers and background tasks need, assembled
/// once at startup. Shared as `Arc<Core>` rather than re-acquired per call.
pub struct Core {
    pub config: Config,
    pub store: Store,
    pub audit: Arc<AuditLogger>,
    pub exec: CommandExecutor,
    pub docker: DockerClient,
    pub netlink: NetlinkClient,
    pub unit_writer: NetworkUnitWriter,
    pub sessions: Arc<SessionManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub hub: Arc<Hub>,
    pub cluster: Option<Arc<ClusterManager>>,
    pub upload: Arc<UploadManager>,
    pub heartbeats: Vec<Arc<PoolHeartbeat>>,
    pub inotify_monitor: Arc<InotifyMonitor>,
    pub capacity_guardian: Arc<CapacityGuardian>,
}

/// Holds everything required to run the daemon's main loop: the assembled
/// `Core`, the bound HTTP listener, the shutdown broadcast, and the join
/// set background tasks are spawned into.
pub struct ServerContext {
    pub core: Arc<Core>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}
