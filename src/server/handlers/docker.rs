// src/server/handlers/docker.rs

//! `/api/docker/*`: container lifecycle via the Unix-socket Docker client
//! over the Unix-domain socket client. Compose-style bulk operations are out of scope for this
//! handler set, but the per-container verbs cover the
//! `/api/docker/containers|update|pull|logs` surface.

use super::require_permission;
use crate::core::DPlaneError;
use crate::core::audit::AuditEvent;
use crate::core::auth::AuthenticatedUser;
use crate::core::exec::whitelist::{self, Kind};
use crate::server::context::Core;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub async fn list_containers(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "container", "read").await?;
    let containers = core.docker.list_all().await?;
    Ok(Json(json!({"success": true, "containers": containers})))
}

pub async fn inspect_container(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "container", "read").await?;
    whitelist::check(Kind::ContainerName, &id)?;
    let info = core.docker.inspect(&id).await?;
    Ok(Json(json!({"success": true, "container": info})))
}

pub async fn start_container(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "container", "write").await?;
    whitelist::check(Kind::ContainerName, &id)?;
    core.docker.start(&id).await?;
    core.audit.log(AuditEvent::new(&user.username, "container_started", &id, "-", true)).await;
    Ok(Json(json!({"success": true})))
}

pub async fn stop_container(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "container", "write").await?;
    whitelist::check(Kind::ContainerName, &id)?;
    core.docker.stop(&id, 10).await?;
    core.audit.log(AuditEvent::new(&user.username, "container_stopped", &id, "-", true)).await;
    Ok(Json(json!({"success": true})))
}

pub async fn restart_container(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "container", "write").await?;
    whitelist::check(Kind::ContainerName, &id)?;
    core.docker.restart(&id, 10).await?;
    core.audit.log(AuditEvent::new(&user.username, "container_restarted", &id, "-", true)).await;
    Ok(Json(json!({"success": true})))
}

pub async fn pause_container(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "container", "write").await?;
    whitelist::check(Kind::ContainerName, &id)?;
    core.docker.pause(&id).await?;
    Ok(Json(json!({"success": true})))
}

pub async fn unpause_container(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "container", "write").await?;
    whitelist::check(Kind::ContainerName, &id)?;
    core.docker.unpause(&id).await?;
    Ok(Json(json!({"success": true})))
}

pub async fn remove_container(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "container", "delete").await?;
    whitelist::check(Kind::ContainerName, &id)?;
    let force = params.get("force").map(|v| v == "true").unwrap_or(false);
    core.docker.remove(&id, force).await?;
    core.audit.log(AuditEvent::new(&user.username, "container_removed", &id, "-", true)).await;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub image: String,
}

pub async fn pull_image(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<PullRequest>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "container", "write").await?;
    core.docker.pull(&body.image).await?;
    core.audit.log(AuditEvent::new(&user.username, "image_pulled", &body.image, "-", true)).await;
    Ok(Json(json!({"success": true})))
}

/// Pulls the current image and restarts the container, the closest
/// equivalent to a "check for updates and apply" button without a
/// recreate-with-new-image orchestration layer.
pub async fn update_container(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "container", "write").await?;
    whitelist::check(Kind::ContainerName, &id)?;
    let info = core.docker.inspect(&id).await?;
    let image = info
        .get("Config")
        .and_then(|c| c.get("Image"))
        .and_then(|i| i.as_str())
        .ok_or_else(|| DPlaneError::Internal("container inspect missing Config.Image".to_string()))?
        .to_string();
    core.docker.pull(&image).await?;
    core.docker.restart(&id, 10).await?;
    core.audit.log(AuditEvent::new(&user.username, "container_updated", &id, "-", true)).await;
    Ok(Json(json!({"success": true, "image": image})))
}

pub async fn container_logs(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "container", "read").await?;
    whitelist::check(Kind::ContainerName, &id)?;
    let tail: u32 = params.get("tail").and_then(|v| v.parse().ok()).unwrap_or(200);
    let logs = core.docker.logs(&id, tail).await?;
    Ok(Json(json!({"success": true, "logs": logs})))
}
