// src/server/handlers/cluster.rs

//! `/api/cluster/*`: peer registration, status, and the inbound heartbeat
//! endpoint peers call on each other. A 503 is returned when cluster mode
//! is disabled rather than silently no-opping.

use super::require_permission;
use crate::core::DPlaneError;
use crate::core::auth::AuthenticatedUser;
use crate::core::cluster::PeerRole;
use crate::server::context::Core;
use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

fn require_cluster(core: &Core) -> Result<&crate::core::cluster::ClusterManager, DPlaneError> {
    core.cluster
        .as_deref()
        .ok_or_else(|| DPlaneError::DependencyUnavailable("cluster mode is not enabled".to_string()))
}

pub async fn status(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "cluster", "read").await?;
    let cluster = require_cluster(&core)?;
    Ok(Json(json!({"success": true, "status": cluster.status().await})))
}

#[derive(Debug, Deserialize)]
pub struct RegisterPeerRequest {
    pub id: String,
    pub address: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "unknown".to_string()
}

pub async fn list_peers(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "cluster", "read").await?;
    let cluster = require_cluster(&core)?;
    Ok(Json(json!({"success": true, "peers": cluster.status().await.peers})))
}

pub async fn register_peer(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<RegisterPeerRequest>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "cluster", "admin").await?;
    let cluster = require_cluster(&core)?;
    cluster.register_peer(&body.id, &body.address, &body.version).await?;
    Ok(Json(json!({"success": true})))
}

pub async fn remove_peer(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "cluster", "admin").await?;
    let cluster = require_cluster(&core)?;
    cluster.remove_peer(&id).await?;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct SetPeerRoleRequest {
    pub role: String,
}

/// Explicit promotion/demotion of a peer, per the cluster manager's
/// no-consensus design: the caller is responsible for not creating two
/// simultaneous actives.
pub async fn set_peer_role(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(body): Json<SetPeerRoleRequest>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "cluster", "admin").await?;
    let cluster = require_cluster(&core)?;
    let role = if body.role == "active" { PeerRole::Active } else { PeerRole::Standby };
    cluster.set_peer_role(&id, role).await?;
    Ok(Json(json!({"success": true})))
}

/// Inbound heartbeat from a peer node. Authenticated the same as every
/// other route (a valid session + CSRF on the caller's side) — there is no
/// separate peer-to-peer credential in this design.
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub id: String,
    pub address: String,
    pub role: String,
    #[serde(default = "default_version")]
    pub version: String,
}

pub async fn heartbeat(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<HeartbeatRequest>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "cluster", "write").await?;
    let cluster = require_cluster(&core)?;
    let role = if body.role == "active" { PeerRole::Active } else { PeerRole::Standby };
    cluster.record_heartbeat(&body.id, &body.address, role, &body.version).await?;
    Ok(Json(json!({"success": true})))
}
