// src/server/handlers/zfs.rs

//! `/api/zfs/*`: pools, datasets, snapshots, scrub, smart, and the rollup
//! health view backed by the pool heartbeat monitor.

use super::require_permission;
use crate::core::DPlaneError;
use crate::core::audit::AuditEvent;
use crate::core::auth::AuthenticatedUser;
use crate::core::exec::whitelist::{self, Kind};
use crate::core::exec::ExecClass;
use crate::server::context::Core;
use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub async fn list_pools(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "zfs_pool", "read").await?;
    let out = core.exec.run(ExecClass::Fast, "zpool", &["list", "-H", "-o", "name,size,alloc,free,health"]).await?;
    let pools: Vec<serde_json::Value> = out
        .combined_output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 5 {
                return None;
            }
            Some(json!({"name": cols[0], "size": cols[1], "alloc": cols[2], "free": cols[3], "health": cols[4]}))
        })
        .collect();
    Ok(Json(json!({"success": true, "pools": pools})))
}

#[derive(Debug, Deserialize)]
pub struct ScrubRequest {
    pub pool: String,
}

pub async fn scrub_pool(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<ScrubRequest>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "zfs_pool", "write").await?;
    whitelist::check(Kind::PoolName, &body.pool)?;
    core.exec.run(ExecClass::Zfs, "zpool", &["scrub", &body.pool]).await?;
    core.audit
        .log(AuditEvent::new(&user.username, "zfs_scrub_started", &body.pool, "-", true))
        .await;
    Ok(Json(json!({"success": true})))
}

pub async fn pool_health(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "zfs_pool", "read").await?;
    let mut statuses = Vec::with_capacity(core.heartbeats.len());
    for h in &core.heartbeats {
        statuses.push(json!({"pool": h.pool_name(), "healthy": h.is_healthy().await}));
    }
    Ok(Json(json!({"success": true, "pools": statuses})))
}

pub async fn list_datasets(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(pool): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "zfs_dataset", "read").await?;
    whitelist::check(Kind::PoolName, &pool)?;
    let out = core
        .exec
        .run(ExecClass::Fast, "zfs", &["list", "-H", "-r", "-o", "name,used,avail,mountpoint", &pool])
        .await?;
    let datasets: Vec<serde_json::Value> = out
        .combined_output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 4 {
                return None;
            }
            Some(json!({"name": cols[0], "used": cols[1], "avail": cols[2], "mountpoint": cols[3]}))
        })
        .collect();
    Ok(Json(json!({"success": true, "datasets": datasets})))
}

#[derive(Debug, Deserialize)]
pub struct CreateDatasetRequest {
    pub dataset: String,
}

pub async fn create_dataset(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<CreateDatasetRequest>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "zfs_dataset", "write").await?;
    whitelist::check(Kind::DatasetName, &body.dataset)?;
    core.exec.run(ExecClass::Zfs, "zfs", &["create", &body.dataset]).await?;
    core.audit
        .log(AuditEvent::new(&user.username, "zfs_dataset_created", &body.dataset, "-", true))
        .await;
    Ok(Json(json!({"success": true})))
}

pub async fn destroy_dataset(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(dataset): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "zfs_dataset", "delete").await?;
    whitelist::check(Kind::DatasetName, &dataset)?;
    let out = core.exec.run(ExecClass::Zfs, "zfs", &["destroy", &dataset]).await?;
    if !out.success() && !out.combined_output.contains("does not exist") {
        return Err(DPlaneError::DependencyUnavailable(out.combined_output));
    }
    core.audit
        .log(AuditEvent::new(&user.username, "zfs_dataset_destroyed", &dataset, "-", true))
        .await;
    Ok(Json(json!({"success": true})))
}

pub async fn list_snapshots(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(dataset): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "zfs_dataset", "read").await?;
    whitelist::check(Kind::DatasetName, &dataset)?;
    let out = core
        .exec
        .run(ExecClass::Fast, "zfs", &["list", "-H", "-t", "snapshot", "-o", "name,used,creation", "-r", &dataset])
        .await?;
    let snapshots: Vec<serde_json::Value> = out
        .combined_output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 3 {
                return None;
            }
            Some(json!({"name": cols[0], "used": cols[1], "created": cols[2]}))
        })
        .collect();
    Ok(Json(json!({"success": true, "snapshots": snapshots})))
}

#[derive(Debug, Deserialize)]
pub struct CreateSnapshotRequest {
    pub snapshot: String,
}

pub async fn create_snapshot(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<CreateSnapshotRequest>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "zfs_dataset", "write").await?;
    whitelist::check(Kind::SnapshotName, &body.snapshot)?;
    core.exec.run(ExecClass::Zfs, "zfs", &["snapshot", &body.snapshot]).await?;
    core.audit
        .log(AuditEvent::new(&user.username, "zfs_snapshot_created", &body.snapshot, "-", true))
        .await;
    Ok(Json(json!({"success": true})))
}

pub async fn destroy_snapshot(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(snapshot): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "zfs_dataset", "delete").await?;
    whitelist::check(Kind::SnapshotName, &snapshot)?;
    let out = core.exec.run(ExecClass::Zfs, "zfs", &["destroy", &snapshot]).await?;
    if !out.success() && !out.combined_output.contains("does not exist") {
        return Err(DPlaneError::DependencyUnavailable(out.combined_output));
    }
    core.audit
        .log(AuditEvent::new(&user.username, "zfs_snapshot_destroyed", &snapshot, "-", true))
        .await;
    Ok(Json(json!({"success": true})))
}

pub async fn smart_status(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(device): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "zfs_pool", "read").await?;
    if !device.chars().all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '-' || c == '_') {
        return Err(DPlaneError::WhitelistRejected { field: "device".to_string() });
    }
    let out = core.exec.run(ExecClass::Fast, "smartctl", &["-H", "-A", &device]).await?;
    Ok(Json(json!({"success": true, "device": device, "output": out.combined_output})))
}
