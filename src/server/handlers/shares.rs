// src/server/handlers/shares.rs

//! `/api/shares/smb` and `/api/shares/nfs`: share lifecycle driven entirely
//! through the whitelisted command executor — there is no dedicated SMB/NFS
//! component, these handlers are direct consumers of the command executor, same as
//! the ZFS and Docker handlers are of their respective clients.

use super::require_permission;
use crate::core::DPlaneError;
use crate::core::audit::AuditEvent;
use crate::core::auth::AuthenticatedUser;
use crate::core::exec::ExecClass;
use crate::server::context::Core;
use axum::Json;
use axum::extract::{Path, State};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

static SHARE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,63}$").unwrap());

fn check_share_name(name: &str) -> Result<(), DPlaneError> {
    if SHARE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(DPlaneError::WhitelistRejected { field: "share".to_string() })
    }
}

#[derive(Debug, Deserialize)]
pub struct SmbShareRequest {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub guest_ok: bool,
}

pub async fn create_smb_share(
    axum::extract::State(core): axum::extract::State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<SmbShareRequest>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "share", "write").await?;
    check_share_name(&body.name)?;
    let guest = if body.guest_ok { "y" } else { "n" };
    core.exec
        .run(ExecClass::Medium, "net", &["usershare", "add", &body.name, &body.path, "", "Everyone:F", &format!("guest_ok={guest}")])
        .await?;
    core.audit
        .log(AuditEvent::new(&user.username, "smb_share_created", &body.name, "-", true))
        .await;
    Ok(Json(json!({"success": true})))
}

pub async fn delete_smb_share(
    axum::extract::State(core): axum::extract::State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "share", "delete").await?;
    check_share_name(&name)?;
    let out = core.exec.run(ExecClass::Medium, "net", &["usershare", "delete", &name]).await?;
    if !out.success() && !out.combined_output.to_lowercase().contains("doesn't exist") {
        return Err(DPlaneError::DependencyUnavailable(out.combined_output));
    }
    core.audit
        .log(AuditEvent::new(&user.username, "smb_share_deleted", &name, "-", true))
        .await;
    Ok(Json(json!({"success": true})))
}

pub async fn list_smb_shares(
    axum::extract::State(core): axum::extract::State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "share", "read").await?;
    let out = core.exec.run(ExecClass::Fast, "net", &["usershare", "list"]).await?;
    let shares: Vec<&str> = out.combined_output.lines().collect();
    Ok(Json(json!({"success": true, "shares": shares})))
}

#[derive(Debug, Deserialize)]
pub struct NfsExportRequest {
    pub path: String,
    #[serde(default = "default_nfs_options")]
    pub options: String,
}

fn default_nfs_options() -> String {
    "*(ro,sync,no_subtree_check)".to_string()
}

pub async fn create_nfs_export(
    axum::extract::State(core): axum::extract::State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<NfsExportRequest>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "share", "write").await?;
    if !body.path.starts_with('/') {
        return Err(DPlaneError::InvalidInput("export path must be absolute".to_string()));
    }
    let export_line = format!("{} {}", body.path, body.options);
    core.exec.run(ExecClass::Medium, "exportfs", &["-o", &body.options, &body.path]).await?;
    core.audit
        .log(AuditEvent::new(&user.username, "nfs_export_created", &body.path, "-", true).with_details(export_line))
        .await;
    Ok(Json(json!({"success": true})))
}

pub async fn delete_nfs_export(
    axum::extract::State(core): axum::extract::State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(encoded_path): Path<String>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "share", "delete").await?;
    let path = format!("/{encoded_path}");
    core.exec.run(ExecClass::Medium, "exportfs", &["-u", &path]).await?;
    core.audit
        .log(AuditEvent::new(&user.username, "nfs_export_deleted", &path, "-", true))
        .await;
    Ok(Json(json!({"success": true})))
}

pub async fn list_nfs_exports(
    axum::extract::State(core): axum::extract::State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "share", "read").await?;
    let out = core.exec.run(ExecClass::Fast, "exportfs", &["-v"]).await?;
    Ok(Json(json!({"success": true, "exports": out.combined_output})))
}
