// src/server/handlers/auth.rs

//! Public auth endpoints: login, logout, session check, and CSRF token
//! issuance. These bypass `middleware::session_validation` (they are in
//! the public set) and resolve whatever session token is present themselves.

use crate::core::DPlaneError;
use crate::core::audit::AuditEvent;
use crate::server::context::Core;
use crate::server::middleware::extract_session_token;
use axum::Json;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(core): State<Arc<Core>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<LoginRequest>,
) -> impl IntoResponse {
    let addr_str = addr.ip().to_string();
    match core.sessions.login(&body.username, &body.password).await {
        Ok((user, session)) => {
            core.audit
                .log(AuditEvent::new(&user.username, "login", "session", &addr_str, true))
                .await;
            crate::core::metrics::ACTIVE_SESSIONS.inc();
            Json(json!({
                "success": true,
                "user": {"id": user.user_id, "username": user.username},
                "session_id": session.token,
                "csrf_token": session.csrf_token,
                "expires_at": session.expires_at,
            }))
            .into_response()
        }
        Err(e) => {
            core.audit
                .log(AuditEvent::new(&body.username, "login_failed", "session", &addr_str, false))
                .await;
            crate::core::metrics::LOGIN_FAILURES_TOTAL.inc();
            e.into_response()
        }
    }
}

pub async fn logout(State(core): State<Arc<Core>>, req: Request<Body>) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&req) {
        if let Ok((user, _)) = core.sessions.validate(&token).await {
            core.audit
                .log(AuditEvent::new(&user.username, "logout", "session", "-", true))
                .await;
            crate::core::metrics::ACTIVE_SESSIONS.dec();
        }
        let _ = core.sessions.logout(&token).await;
    }
    Json(json!({"success": true}))
}

pub async fn check(State(core): State<Arc<Core>>, req: Request<Body>) -> impl IntoResponse {
    let Some(token) = extract_session_token(&req) else {
        return Json(json!({"success": true, "authenticated": false}));
    };
    match core.sessions.validate(&token).await {
        Ok((user, _)) => Json(json!({
            "success": true,
            "authenticated": true,
            "user": {"id": user.user_id, "username": user.username},
        })),
        Err(_) => Json(json!({"success": true, "authenticated": false})),
    }
}

pub async fn csrf(State(core): State<Arc<Core>>, req: Request<Body>) -> impl IntoResponse {
    let Some(token) = extract_session_token(&req) else {
        return DPlaneError::Unauthenticated.into_response();
    };
    match core.sessions.validate(&token).await {
        Ok((_, session)) => Json(json!({"success": true, "csrf_token": session.csrf_token})).into_response(),
        Err(e) => e.into_response(),
    }
}
