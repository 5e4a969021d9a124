// src/core/errors.rs

//! Defines the primary error type for the entire control daemon.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the daemon.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug, Clone)]
pub enum DPlaneError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("whitelist rejection: {field} did not match the allowed pattern")]
    WhitelistRejected { field: String },

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: missing permission {resource}:{action}")]
    Forbidden { resource: String, action: String },

    #[error("forbidden: csrf token missing or invalid")]
    CsrfRejected,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited")]
    RateLimited,

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("command '{program}' exceeded its deadline")]
    DeadlineExceeded { program: String, args: Vec<String> },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("store error: {0}")]
    Store(String),
}

impl DPlaneError {
    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            DPlaneError::InvalidInput(_) | DPlaneError::WhitelistRejected { .. } => {
                StatusCode::BAD_REQUEST
            }
            DPlaneError::Unauthenticated => StatusCode::UNAUTHORIZED,
            DPlaneError::Forbidden { .. } | DPlaneError::CsrfRejected => StatusCode::FORBIDDEN,
            DPlaneError::NotFound(_) => StatusCode::NOT_FOUND,
            DPlaneError::Conflict(_) => StatusCode::CONFLICT,
            DPlaneError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            DPlaneError::DependencyUnavailable(_) | DPlaneError::DeadlineExceeded { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DPlaneError::Internal(_) | DPlaneError::Io(_) | DPlaneError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether a failure of this kind should produce a security audit record:
    /// whitelist rejections, auth failures, and permission denials always do;
    /// plain bad input does not unless it looks adversarial.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            DPlaneError::WhitelistRejected { .. }
                | DPlaneError::Unauthenticated
                | DPlaneError::Forbidden { .. }
                | DPlaneError::CsrfRejected
                | DPlaneError::RateLimited
        )
    }

    /// One-line, user-safe message. Never echoes whitelist-failed input verbatim.
    pub fn user_message(&self) -> String {
        match self {
            DPlaneError::WhitelistRejected { field } => {
                format!("invalid value for '{field}'")
            }
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for DPlaneError {
    fn from(e: std::io::Error) -> Self {
        DPlaneError::Io(Arc::new(e))
    }
}

impl From<rusqlite::Error> for DPlaneError {
    fn from(e: rusqlite::Error) -> Self {
        DPlaneError::Store(e.to_string())
    }
}

impl axum::response::IntoResponse for DPlaneError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        use serde_json::json;

        let status = self.status_code();
        let body = Json(json!({
            "success": false,
            "error": self.user_message(),
        }));
        (status, body).into_response()
    }
}
