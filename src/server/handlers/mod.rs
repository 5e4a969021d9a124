// src/server/handlers/mod.rs

//! The HTTP handler surface. Each handler follows the same
//! shape — validate input against the whitelist, check RBAC where the
//! route is not self-service, call into the relevant core component, audit
//! the outcome, respond with `{success, ...}` or `{success:false, error}`.

pub mod auth;
pub mod cluster;
pub mod docker;
pub mod health;
pub mod network;
pub mod rbac;
pub mod shares;
pub mod upload;
pub mod ws;
pub mod zfs;

use crate::core::DPlaneError;
use crate::core::audit::{AuditEvent, AuditLogger};
use crate::core::auth::AuthenticatedUser;
use crate::core::rbac;
use crate::core::store::Store;
use axum::Json;
use serde_json::{Value, json};

/// Wraps a JSON value in the daemon's `{success:true, ...}` response envelope.
pub fn ok(value: Value) -> Json<Value> {
    match value {
        Value::Object(mut map) => {
            map.insert("success".to_string(), Value::Bool(true));
            Json(Value::Object(map))
        }
        other => Json(json!({"success": true, "data": other})),
    }
}

/// Checks the `(resource, action)` permission pair for `user`, emitting a
/// security audit event and `Forbidden` on denial.
pub async fn require_permission(
    store: &Store,
    audit: &AuditLogger,
    user: &AuthenticatedUser,
    resource: &str,
    action: &str,
) -> Result<(), DPlaneError> {
    if rbac::has_permission(store, user.user_id, resource, action).await? {
        Ok(())
    } else {
        audit
            .log(
                AuditEvent::new(&user.username, "permission_denied", resource, "-", false)
                    .with_details(format!("required {resource}:{action}")),
            )
            .await;
        Err(DPlaneError::Forbidden { resource: resource.to_string(), action: action.to_string() })
    }
}
