// src/core/auth/mod.rs

//! Session lifecycle, password verification, and CSRF tokens.
//! Rate limiting lives in [`rate_limit`] since it is address-keyed rather
//! than session-keyed, but is wired in next to session validation in the
//! router's middleware stack.

pub mod rate_limit;

use crate::core::DPlaneError;
use crate::core::metrics::ACTIVE_SESSIONS;
use crate::core::store::Store;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng};
use argon2::Argon2;
use rand::RngCore;
use std::time::Duration;
use tracing::info;

pub const SESSION_TOKEN_BYTES: usize = 32; // 256 bits, well over the 128-bit floor.

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub csrf_token: String,
    pub created_at: i64,
    pub expires_at: i64,
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn hash_password(plain: &str) -> Result<String, DPlaneError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| DPlaneError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else { return false };
    Argon2::default().verify_password(plain.as_bytes(), &parsed).is_ok()
}

/// Session/CSRF issuance, validation, and periodic sweep of expired rows.
pub struct SessionManager {
    store: Store,
    ttl_secs: i64,
    cleanup_interval: Duration,
}

impl SessionManager {
    pub fn new(store: Store, ttl_secs: u64, cleanup_interval: Duration) -> Self {
        Self { store, ttl_secs: ttl_secs as i64, cleanup_interval }
    }

    /// Verifies `username`/`password` against the stored hash and, on
    /// success, issues a new session and CSRF token pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<(AuthenticatedUser, Session), DPlaneError> {
        let username = username.to_string();
        let row = self
            .store
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT id, password_hash, active FROM users WHERE username = ?1",
                    [&username],
                    |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?)),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        DPlaneError::Unauthenticated
                    }
                    other => other.into(),
                })
            })
            .await?;

        let (user_id, password_hash, active) = row;
        if active == 0 || !verify_password(password, &password_hash) {
            return Err(DPlaneError::Unauthenticated);
        }

        let token = random_token(SESSION_TOKEN_BYTES);
        let csrf_token = random_token(SESSION_TOKEN_BYTES);
        let created_at = now_unix();
        let expires_at = created_at + self.ttl_secs;

        let session = Session { token, user_id, csrf_token, created_at, expires_at };
        let to_persist = session.clone();
        self.store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (token, user_id, csrf_token, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        to_persist.token,
                        to_persist.user_id,
                        to_persist.csrf_token,
                        to_persist.created_at,
                        to_persist.expires_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        let username_row = username_for(&self.store, user_id).await?;
        Ok((AuthenticatedUser { user_id, username: username_row }, session))
    }

    pub async fn logout(&self, token: &str) -> Result<(), DPlaneError> {
        let token = token.to_string();
        self.store
            .with_conn(move |conn| {
                conn.execute("DELETE FROM sessions WHERE token = ?1", [&token])?;
                Ok(())
            })
            .await
    }

    /// Looks up `token`, rejecting it if missing or expired.
    pub async fn validate(&self, token: &str) -> Result<(AuthenticatedUser, Session), DPlaneError> {
        let token_owned = token.to_string();
        let row = self
            .store
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT token, user_id, csrf_token, created_at, expires_at FROM sessions WHERE token = ?1",
                    [&token_owned],
                    |r| {
                        Ok(Session {
                            token: r.get(0)?,
                            user_id: r.get(1)?,
                            csrf_token: r.get(2)?,
                            created_at: r.get(3)?,
                            expires_at: r.get(4)?,
                        })
                    },
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => DPlaneError::Unauthenticated,
                    other => other.into(),
                })
            })
            .await?;

        if row.expires_at < now_unix() {
            return Err(DPlaneError::Unauthenticated);
        }

        let username = username_for(&self.store, row.user_id).await?;
        Ok((AuthenticatedUser { user_id: row.user_id, username }, row))
    }

    /// CSRF tokens are bound to the session and must match exactly.
    pub fn check_csrf(session: &Session, presented: &str) -> Result<(), DPlaneError> {
        if presented == session.csrf_token {
            Ok(())
        } else {
            Err(DPlaneError::CsrfRejected)
        }
    }

    async fn purge_expired(&self) -> Result<usize, DPlaneError> {
        let now = now_unix();
        let affected = self
            .store
            .with_conn(move |conn| {
                let affected = conn.execute("DELETE FROM sessions WHERE expires_at < ?1", [now])?;
                Ok(affected)
            })
            .await?;
        ACTIVE_SESSIONS.sub(affected as f64);
        Ok(affected)
    }

    pub async fn run(self: std::sync::Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.cleanup_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.purge_expired().await {
                        Ok(n) if n > 0 => info!(purged = n, "expired sessions purged"),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "session purge failed"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}

async fn username_for(store: &Store, user_id: i64) -> Result<String, DPlaneError> {
    store
        .with_conn(move |conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [user_id], |r| r.get(0))
                .map_err(Into::into)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_roundtrips() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn csrf_check_requires_exact_match() {
        let session = Session {
            token: "t".into(),
            user_id: 1,
            csrf_token: "abc123".into(),
            created_at: 0,
            expires_at: i64::MAX,
        };
        assert!(SessionManager::check_csrf(&session, "abc123").is_ok());
        assert!(matches!(
            SessionManager::check_csrf(&session, "wrong"),
            Err(DPlaneError::CsrfRejected)
        ));
    }

    #[tokio::test]
    async fn login_rejects_unknown_user() {
        let store = Store::open(":memory:").await.unwrap();
        let mgr = SessionManager::new(store, 3600, Duration::from_secs(900));
        let err = mgr.login("nobody", "whatever").await.unwrap_err();
        assert!(matches!(err, DPlaneError::Unauthenticated));
    }

    #[tokio::test]
    async fn login_then_validate_round_trips() {
        let store = Store::open(":memory:").await.unwrap();
        let hash = hash_password("hunter2").unwrap();
        store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO users (username, password_hash, created_at) VALUES ('alice', ?1, 0)",
                    [&hash],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let mgr = SessionManager::new(store, 3600, Duration::from_secs(900));
        let (user, session) = mgr.login("alice", "hunter2").await.unwrap();
        assert_eq!(user.username, "alice");

        let (validated_user, _) = mgr.validate(&session.token).await.unwrap();
        assert_eq!(validated_user.user_id, user.user_id);
    }

    #[tokio::test]
    async fn validate_rejects_expired_session() {
        let store = Store::open(":memory:").await.unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO users (username, password_hash, created_at) VALUES ('bob', 'x', 0)",
                    [],
                )?;
                conn.execute(
                    "INSERT INTO sessions (token, user_id, csrf_token, created_at, expires_at) VALUES ('tok', 1, 'csrf', 0, 1)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let mgr = SessionManager::new(store, 3600, Duration::from_secs(900));
        let err = mgr.validate("tok").await.unwrap_err();
        assert!(matches!(err, DPlaneError::Unauthenticated));
    }
}
