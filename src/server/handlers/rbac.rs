// src/server/handlers/rbac.rs

//! `/api/rbac/*`: role/permission listing and per-user role grants, backed
//! directly by the schema tables the RBAC engine reads (the engine itself only
//! answers yes/no permission checks; these handlers own the CRUD side).

use super::require_permission;
use crate::core::DPlaneError;
use crate::core::audit::AuditEvent;
use crate::core::auth::AuthenticatedUser;
use crate::core::rbac;
use crate::server::context::Core;
use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub async fn list_roles(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "role", "read").await?;
    let roles = core
        .store
        .with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, display_name, is_system FROM roles ORDER BY id")?;
            let rows = stmt.query_map([], |r| {
                Ok(json!({
                    "id": r.get::<_, i64>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "display_name": r.get::<_, String>(2)?,
                    "is_system": r.get::<_, i64>(3)? != 0,
                }))
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?;
    Ok(Json(json!({"success": true, "roles": roles})))
}

pub async fn list_permissions(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "role", "read").await?;
    let permissions = core
        .store
        .with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, resource, action FROM permissions ORDER BY resource, action")?;
            let rows = stmt.query_map([], |r| {
                Ok(json!({
                    "id": r.get::<_, i64>(0)?,
                    "resource": r.get::<_, String>(1)?,
                    "action": r.get::<_, String>(2)?,
                }))
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?;
    Ok(Json(json!({"success": true, "permissions": permissions})))
}

pub async fn list_user_roles(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(target_user_id): Path<i64>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "role", "read").await?;
    let roles = core
        .store
        .with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, ur.expires_at FROM user_roles ur
                 JOIN roles r ON r.id = ur.role_id WHERE ur.user_id = ?1",
            )?;
            let rows = stmt.query_map([target_user_id], |r| {
                Ok(json!({
                    "role_id": r.get::<_, i64>(0)?,
                    "role_name": r.get::<_, String>(1)?,
                    "expires_at": r.get::<_, Option<i64>>(2)?,
                }))
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?;
    Ok(Json(json!({"success": true, "roles": roles})))
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: i64,
    pub expires_at: Option<i64>,
}

pub async fn assign_user_role(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(target_user_id): Path<i64>,
    Json(body): Json<AssignRoleRequest>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "role", "admin").await?;
    core.store
        .with_conn(move |conn| {
            conn.execute(
                "INSERT INTO user_roles (user_id, role_id, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, role_id) DO UPDATE SET expires_at = excluded.expires_at",
                rusqlite::params![target_user_id, body.role_id, body.expires_at],
            )?;
            Ok(())
        })
        .await?;
    core.audit
        .log(
            AuditEvent::new(&user.username, "role_assigned", format!("user:{target_user_id}"), "-", true)
                .with_details(format!("role_id={}", body.role_id)),
        )
        .await;
    Ok(Json(json!({"success": true})))
}

pub async fn revoke_user_role(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path((target_user_id, role_id)): Path<(i64, i64)>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "role", "admin").await?;
    if role_id_is_admin(&core.store, role_id).await? && rbac::is_last_admin(&core.store, target_user_id).await? {
        return Err(DPlaneError::Conflict("cannot remove the last administrator's admin role".to_string()));
    }
    core.store
        .with_conn(move |conn| {
            conn.execute(
                "DELETE FROM user_roles WHERE user_id = ?1 AND role_id = ?2",
                rusqlite::params![target_user_id, role_id],
            )?;
            Ok(())
        })
        .await?;
    core.audit
        .log(AuditEvent::new(&user.username, "role_revoked", format!("user:{target_user_id}"), "-", true))
        .await;
    Ok(Json(json!({"success": true})))
}

async fn role_id_is_admin(store: &crate::core::store::Store, role_id: i64) -> Result<bool, DPlaneError> {
    store
        .with_conn(move |conn| {
            let name: String = conn.query_row("SELECT name FROM roles WHERE id = ?1", [role_id], |r| r.get(0))?;
            Ok(name == "admin")
        })
        .await
}
