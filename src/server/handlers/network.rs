// src/server/handlers/network.rs

//! `/api/network/*`: bond/VLAN/address desired-state mutations, plus the
//! `apply`/`confirm` pair that drives the reconciler on demand
//! rather than only at startup.

use super::require_permission;
use crate::core::DPlaneError;
use crate::core::audit::AuditEvent;
use crate::core::auth::AuthenticatedUser;
use crate::core::exec::whitelist::{self, Kind};
use crate::core::network::model::{BondConfig, InterfaceConfig, InterfaceKind, NetworkDesiredState, VlanConfig};
use crate::core::network::reconciler;
use crate::server::context::Core;
use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub async fn get_desired_state(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "network", "read").await?;
    let state = NetworkDesiredState::load(&core.store).await?;
    Ok(Json(json!({"success": true, "state": state})))
}

#[derive(Debug, Deserialize)]
pub struct CreateBondRequest {
    pub name: String,
    pub slaves: Vec<String>,
    #[serde(default = "default_bond_mode")]
    pub mode: String,
}

fn default_bond_mode() -> String {
    "802.3ad".to_string()
}

pub async fn create_bond(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<CreateBondRequest>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "network", "write").await?;
    whitelist::check(Kind::InterfaceName, &body.name)?;
    for slave in &body.slaves {
        whitelist::check(Kind::InterfaceName, slave)?;
    }

    let mut state = NetworkDesiredState::load(&core.store).await?;
    state.bonds.retain(|b| b.name != body.name);
    state.bonds.push(BondConfig { name: body.name.clone(), slaves: body.slaves.clone(), mode: body.mode.clone() });
    state.validate()?;

    NetworkDesiredState::save_bond(&core.store, BondConfig { name: body.name.clone(), slaves: body.slaves, mode: body.mode }).await?;
    core.audit.log(AuditEvent::new(&user.username, "bond_configured", &body.name, "-", true)).await;
    Ok(Json(json!({"success": true})))
}

pub async fn delete_bond(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "network", "delete").await?;
    whitelist::check(Kind::InterfaceName, &name)?;
    core.store
        .with_conn(move |conn| {
            conn.execute("DELETE FROM net_bonds WHERE name = ?1", [&name])?;
            Ok(())
        })
        .await?;
    if let Some(link) = core.netlink.find_link(&name)? {
        core.netlink.del_link(link.index)?;
    }
    core.audit.log(AuditEvent::new(&user.username, "bond_deleted", &name, "-", true)).await;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct CreateVlanRequest {
    pub name: String,
    pub parent: String,
    pub vlan_id: u16,
}

pub async fn create_vlan(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<CreateVlanRequest>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "network", "write").await?;
    whitelist::check(Kind::InterfaceName, &body.name)?;
    whitelist::check(Kind::InterfaceName, &body.parent)?;

    let mut state = NetworkDesiredState::load(&core.store).await?;
    state.vlans.retain(|v| v.name != body.name);
    state.vlans.push(VlanConfig { name: body.name.clone(), parent: body.parent.clone(), vlan_id: body.vlan_id });
    state.validate()?;

    NetworkDesiredState::save_vlan(&core.store, VlanConfig { name: body.name.clone(), parent: body.parent, vlan_id: body.vlan_id }).await?;
    core.audit.log(AuditEvent::new(&user.username, "vlan_configured", &body.name, "-", true)).await;
    Ok(Json(json!({"success": true})))
}

pub async fn delete_vlan(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "network", "delete").await?;
    whitelist::check(Kind::InterfaceName, &name)?;
    core.store
        .with_conn(move |conn| {
            conn.execute("DELETE FROM net_vlans WHERE name = ?1", [&name])?;
            Ok(())
        })
        .await?;
    if let Some(link) = core.netlink.find_link(&name)? {
        core.netlink.del_link(link.index)?;
    }
    core.audit.log(AuditEvent::new(&user.username, "vlan_deleted", &name, "-", true)).await;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmInterfaceRequest {
    pub name: String,
    pub kind: String,
    pub cidr: Option<String>,
    pub gateway: Option<String>,
}

/// Persists a static/DHCP interface assignment. Named "confirm" in the
/// public route list because the dashboard calls it after a user accepts
/// a proposed address change (see `apply` below for the dry-run reconcile).
pub async fn confirm_interface(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<ConfirmInterfaceRequest>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "network", "write").await?;
    whitelist::check(Kind::InterfaceName, &body.name)?;
    if let Some(cidr) = &body.cidr {
        whitelist::check(Kind::Ipv4Cidr, cidr)?;
    }
    let kind = if body.kind == "static" { InterfaceKind::Static } else { InterfaceKind::Dhcp };
    NetworkDesiredState::save_interface(
        &core.store,
        InterfaceConfig { name: body.name.clone(), kind, cidr: body.cidr, gateway: body.gateway },
    )
    .await?;
    core.audit.log(AuditEvent::new(&user.username, "interface_confirmed", &body.name, "-", true)).await;
    Ok(Json(json!({"success": true})))
}

/// Re-runs the reconciler on demand, restoring any desired-state
/// item missing from the kernel's current configuration.
pub async fn apply(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "network", "write").await?;
    let restored = reconciler::reconcile(&core.store, &core.netlink, &core.unit_writer).await?;
    core.audit
        .log(AuditEvent::new(&user.username, "network_reconciled", "network", "-", true).with_details(format!("restored={restored}")))
        .await;
    Ok(Json(json!({"success": true, "restored": restored})))
}
