// src/server/router.rs

//! Builds the axum `Router<Arc<Core>>` that the HTTP handlers are served
//! through. Layer order matters: axum runs the *last*-added layer first, so
//! to get the execution order logging -> session validation -> rate limiting
//! -> handler, the layers below are added innermost-first:
//! rate limiting, then session validation, then the outermost trace layer.

use super::context::Core;
use super::handlers::{auth, cluster, docker, health, network, rbac, shares, upload, ws, zfs};
use super::middleware;
use axum::Router;
use axum::routing::{delete, get, post};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build(core: Arc<Core>) -> Router {
    let api = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/check", get(auth::check))
        .route("/csrf", get(auth::csrf))
        .route("/zfs/pools", get(zfs::list_pools))
        .route("/zfs/pools/scrub", post(zfs::scrub_pool))
        .route("/zfs/pools/health", get(zfs::pool_health))
        .route("/zfs/datasets", post(zfs::create_dataset))
        .route("/zfs/datasets/{pool}", get(zfs::list_datasets))
        .route("/zfs/datasets/{dataset}", delete(zfs::destroy_dataset))
        .route("/zfs/snapshots", post(zfs::create_snapshot))
        .route("/zfs/snapshots/{dataset}", get(zfs::list_snapshots))
        .route("/zfs/snapshots/{snapshot}", delete(zfs::destroy_snapshot))
        .route("/zfs/smart/{device}", get(zfs::smart_status))
        .route("/docker/containers", get(docker::list_containers))
        .route("/docker/containers/{id}", get(docker::inspect_container))
        .route("/docker/containers/{id}/start", post(docker::start_container))
        .route("/docker/containers/{id}/stop", post(docker::stop_container))
        .route("/docker/containers/{id}/restart", post(docker::restart_container))
        .route("/docker/containers/{id}/pause", post(docker::pause_container))
        .route("/docker/containers/{id}/unpause", post(docker::unpause_container))
        .route("/docker/containers/{id}", delete(docker::remove_container))
        .route("/docker/containers/{id}/update", post(docker::update_container))
        .route("/docker/containers/{id}/logs", get(docker::container_logs))
        .route("/docker/images/pull", post(docker::pull_image))
        .route("/shares/smb", get(shares::list_smb_shares).post(shares::create_smb_share))
        .route("/shares/smb/{name}", delete(shares::delete_smb_share))
        .route("/shares/nfs", get(shares::list_nfs_exports).post(shares::create_nfs_export))
        .route("/shares/nfs/{path}", delete(shares::delete_nfs_export))
        .route("/rbac/roles", get(rbac::list_roles))
        .route("/rbac/permissions", get(rbac::list_permissions))
        .route("/rbac/users/{user_id}/roles", get(rbac::list_user_roles).post(rbac::assign_user_role))
        .route("/rbac/users/{user_id}/roles/{role_id}", delete(rbac::revoke_user_role))
        .route("/network/state", get(network::get_desired_state))
        .route("/network/bonds", post(network::create_bond))
        .route("/network/bonds/{name}", delete(network::delete_bond))
        .route("/network/vlans", post(network::create_vlan))
        .route("/network/vlans/{name}", delete(network::delete_vlan))
        .route("/network/interfaces/confirm", post(network::confirm_interface))
        .route("/network/apply", post(network::apply))
        .route("/cluster/status", get(cluster::status))
        .route("/cluster/peers", get(cluster::list_peers).post(cluster::register_peer))
        .route("/cluster/peers/{id}", delete(cluster::remove_peer))
        .route("/cluster/peers/{id}/role", post(cluster::set_peer_role))
        .route("/cluster/heartbeat", post(cluster::heartbeat))
        .route("/upload/chunk", post(upload::upload_chunk))
        .route("/upload/status", get(upload::upload_status))
        .route("/upload/cancel", post(upload::cancel_upload));

    Router::new()
        .route("/health", get(health::health))
        .route("/ws/monitor", get(ws::monitor))
        .nest("/api", api)
        .layer(axum::middleware::from_fn_with_state(core.clone(), middleware::rate_limit))
        .layer(axum::middleware::from_fn_with_state(core.clone(), middleware::session_validation))
        .layer(axum::middleware::from_fn(middleware::record_metrics))
        .layer(TraceLayer::new_for_http())
        // Outermost: the dashboard is served from its own origin.
        .layer(CorsLayer::permissive())
        .with_state(core)
}
