// src/server/middleware.rs

//! The daemon's fixed middleware stack: logging -> session validation ->
//! rate limiting -> handler. Public endpoints are listed explicitly and
//! are the only ones exempt from session validation; every other route
//! requires a valid session. State-changing requests on authenticated
//! routes additionally require a matching CSRF token.

use super::context::Core;
use crate::core::audit::AuditEvent;
use crate::core::auth::{AuthenticatedUser, Session, SessionManager};
use crate::core::metrics::{HTTP_REQUEST_LATENCY_SECONDS, HTTP_REQUESTS_TOTAL};
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Routes that never require a session.
const PUBLIC_PATHS: &[&str] = &[
    "/health",
    "/api/auth/login",
    "/api/auth/logout",
    "/api/auth/check",
    "/api/csrf",
];

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

/// Resolves the caller's session from either `X-Session-ID` + `X-User`
/// headers (which must agree) or the `dplane_session` cookie, then injects
/// `AuthenticatedUser`/`Session` extensions for handlers and the RBAC layer.
pub async fn session_validation(
    State(core): State<Arc<Core>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();

    if is_public(path.as_str()) {
        return next.run(req).await;
    }

    let token = match extract_session_token(&req) {
        Some(t) => t,
        None => {
            return unauthenticated();
        }
    };

    let (user, session) = match core.sessions.validate(&token).await {
        Ok(pair) => pair,
        Err(_) => return unauthenticated(),
    };

    if let Some(header_user) = req.headers().get("X-User").and_then(|v| v.to_str().ok()) {
        if header_user != user.username {
            warn!(path = %path, "X-User header does not match session owner");
            return unauthenticated();
        }
    }

    if req.method() != axum::http::Method::GET && req.method() != axum::http::Method::HEAD {
        let presented = req
            .headers()
            .get("X-CSRF-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if SessionManager::check_csrf(&session, presented).is_err() {
            return csrf_rejected();
        }
    }

    req.extensions_mut().insert(user);
    req.extensions_mut().insert(session);
    next.run(req).await
}

pub(crate) fn extract_session_token(req: &Request<Body>) -> Option<String> {
    if let Some(v) = req.headers().get("X-Session-ID").and_then(|v| v.to_str().ok()) {
        return Some(v.to_string());
    }
    let cookie_header = req.headers().get(axum::http::header::COOKIE)?.to_str().ok()?;
    cookie_header.split(';').find_map(|kv| {
        let kv = kv.trim();
        let (k, v) = kv.split_once('=')?;
        (k == "dplane_session").then(|| v.to_string())
    })
}

fn unauthenticated() -> Response {
    crate::core::DPlaneError::Unauthenticated.into_response()
}

fn csrf_rejected() -> Response {
    crate::core::DPlaneError::CsrfRejected.into_response()
}

/// Per-remote-address sliding window, applied after session validation so
/// the 101st request in a window never reaches the handler (verifiable by
/// scenario 4).
pub async fn rate_limit(
    State(core): State<Arc<Core>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = addr.ip().to_string();
    if !core.rate_limiter.check(&key).await {
        crate::core::metrics::RATE_LIMIT_REJECTIONS_TOTAL.inc();
        let actor = req
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|u| u.username.clone())
            .unwrap_or_else(|| "anonymous".to_string());
        core.audit
            .log(AuditEvent::new(
                actor,
                "rate_limited",
                req.uri().path().to_string(),
                key,
                false,
            ))
            .await;
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }
    next.run(req).await
}

/// Records request count and latency for every request, outermost layer so
/// the timer spans session validation and rate limiting too.
pub async fn record_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    HTTP_REQUEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
    let status_class = match response.status().as_u16() {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    };
    HTTP_REQUESTS_TOTAL.with_label_values(&[&method, status_class]).inc();
    response
}

/// Extension extractor shorthand for handlers that require an authenticated
/// caller; only reachable on non-public routes where `session_validation`
/// has already populated the extension.
pub type CurrentUser = axum::Extension<AuthenticatedUser>;
pub type CurrentSession = axum::Extension<Session>;
