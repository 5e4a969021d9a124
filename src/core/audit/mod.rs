// src/core/audit/mod.rs

//! Buffered + direct-write audit logger with an HMAC hash chain, per the
//! The chain key lives in its own owner-read-only file
//! (parent directory `0700`), separate from the relational store, matching
//! the persisted-state layout.

pub mod hash_chain;

use crate::config::AuditConfig;
use crate::core::DPlaneError;
use crate::core::store::Store;
use rand::RngCore;
use serde::Serialize;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

/// Action verbs that bypass the buffer and write synchronously in their own
/// transaction, per the configured security-critical action set.
const DIRECT_WRITE_ACTIONS: &[&str] = &[
    "login",
    "login_failed",
    "logout",
    "auth_failed",
    "permission_denied",
    "user_created",
    "user_deleted",
    "password_changed",
    "token_created",
    "token_revoked",
];

/// One audit event as constructed by a caller, prior to chain hashing.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub details: String,
    pub source_addr: String,
    pub success: bool,
}

impl AuditEvent {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        source_addr: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            details: String::new(),
            source_addr: source_addr.into(),
            success,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    fn is_direct(&self) -> bool {
        DIRECT_WRITE_ACTIONS.contains(&self.action.as_str())
    }
}

/// A fully persisted audit row, as read back for verification.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub id: i64,
    pub ts: i64,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub details: String,
    pub source_addr: String,
    pub success: bool,
    pub prev_hash: Vec<u8>,
    pub row_hash: Vec<u8>,
}

/// Buffered + direct-write audit logger. Owns the in-memory buffer
/// exclusively; callers transfer events into it via [`AuditLogger::log`].
pub struct AuditLogger {
    store: Store,
    key: Vec<u8>,
    buffer: Mutex<Vec<AuditEvent>>,
    config: AuditConfig,
}

impl AuditLogger {
    pub async fn new(store: Store, config: AuditConfig, key_path: &str) -> Result<Self, DPlaneError> {
        let key = load_or_create_key(key_path)?;
        Ok(Self {
            store,
            key,
            buffer: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Appends `event` to the buffer, or writes it directly if its action is
    /// security-critical. Flushes the buffer if it has reached its max length.
    /// Transaction errors are logged but never block event generation.
    pub async fn log(&self, event: AuditEvent) {
        if event.is_direct() {
            if let Err(e) = self.write_batch(std::slice::from_ref(&event)).await {
                error!(error = %e, "direct audit write failed; control plane continues");
            }
            return;
        }

        let should_flush = {
            let mut buf = self.buffer.lock().await;
            buf.push(event);
            buf.len() >= self.config.max_buffer_len
        };
        if should_flush {
            self.flush().await;
        }
    }

    /// Flushes the buffer in a single transaction. Called by the periodic
    /// flush ticker and on shutdown.
    pub async fn flush(&self) {
        let batch = {
            let mut buf = self.buffer.lock().await;
            if buf.is_empty() {
                return;
            }
            std::mem::take(&mut *buf)
        };
        if let Err(e) = self.write_batch(&batch).await {
            error!(error = %e, dropped = batch.len(), "audit flush failed; events lost from buffer but logging continues");
        }
    }

    /// Runs the periodic flush ticker until `shutdown` fires, then performs
    /// a final flush.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.flush_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.flush().await;
                }
                _ = shutdown.recv() => {
                    self.flush().await;
                    break;
                }
            }
        }
    }

    /// Writes `events` inside one store transaction, extending the hash
    /// chain contiguously; on transaction abort the chain is not extended.
    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), DPlaneError> {
        if events.is_empty() {
            return Ok(());
        }
        let key = self.key.clone();
        let events = events.to_vec();
        self.store
            .with_conn(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let mut prev_hash: Vec<u8> = tx
                    .query_row(
                        "SELECT row_hash FROM audit_log ORDER BY id DESC LIMIT 1",
                        [],
                        |r| r.get(0),
                    )
                    .unwrap_or_default();

                for event in &events {
                    let ts = now_unix();
                    let success_flag = event.success as i64;
                    let fields: [&[u8]; 6] = [
                        event.actor.as_bytes(),
                        event.action.as_bytes(),
                        event.resource.as_bytes(),
                        event.details.as_bytes(),
                        event.source_addr.as_bytes(),
                        if event.success { b"1" } else { b"0" },
                    ];
                    let row_hash = hash_chain::compute_row_hash(&key, &prev_hash, &fields);

                    tx.execute(
                        "INSERT INTO audit_log (ts, actor, action, resource, details, source_addr, success, prev_hash, row_hash)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        rusqlite::params![
                            ts,
                            event.actor,
                            event.action,
                            event.resource,
                            event.details,
                            event.source_addr,
                            success_flag,
                            prev_hash,
                            row_hash,
                        ],
                    )?;
                    prev_hash = row_hash;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Walks the chain in id order recomputing each `row_hash`; returns the
    /// id of the first record at which verification fails, if any.
    pub async fn verify_chain(&self) -> Result<Option<i64>, DPlaneError> {
        let key = self.key.clone();
        self.store
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, actor, action, resource, details, source_addr, success, prev_hash, row_hash
                     FROM audit_log ORDER BY id ASC",
                )?;
                let mut rows = stmt.query([])?;
                let mut expected_prev: Option<Vec<u8>> = None;
                while let Some(row) = rows.next()? {
                    let id: i64 = row.get(0)?;
                    let actor: String = row.get(1)?;
                    let action: String = row.get(2)?;
                    let resource: String = row.get(3)?;
                    let details: String = row.get(4)?;
                    let source_addr: String = row.get(5)?;
                    let success: i64 = row.get(6)?;
                    let prev_hash: Vec<u8> = row.get(7)?;
                    let row_hash: Vec<u8> = row.get(8)?;

                    if let Some(expected) = &expected_prev {
                        if expected != &prev_hash {
                            return Ok(Some(id));
                        }
                    }

                    let fields: [&[u8]; 6] = [
                        actor.as_bytes(),
                        action.as_bytes(),
                        resource.as_bytes(),
                        details.as_bytes(),
                        source_addr.as_bytes(),
                        if success != 0 { b"1" } else { b"0" },
                    ];
                    if !hash_chain::verify_row_hash(&key, &prev_hash, &fields, &row_hash) {
                        return Ok(Some(id));
                    }
                    expected_prev = Some(row_hash);
                }
                Ok(None)
            })
            .await
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Loads the 32-byte HMAC key from `path`, generating and persisting one
/// with owner-only read permissions (parent directory `0700`) if absent.
fn load_or_create_key(path: &str) -> Result<Vec<u8>, DPlaneError> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
    }

    match std::fs::read(path) {
        Ok(bytes) if bytes.len() == 32 => Ok(bytes),
        Ok(_) => {
            warn!(path = %path.display(), "audit key file has unexpected length, regenerating");
            generate_and_store_key(path)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => generate_and_store_key(path),
        Err(e) => Err(e.into()),
    }
}

fn generate_and_store_key(path: &Path) -> Result<Vec<u8>, DPlaneError> {
    let mut key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    std::fs::write(path, &key)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o400))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::Store;

    async fn test_logger(dir: &tempfile::TempDir) -> AuditLogger {
        let db_path = dir.path().join("test.db");
        let key_path = dir.path().join("audit.key");
        let store = Store::open(db_path.to_str().unwrap()).await.unwrap();
        AuditLogger::new(store, AuditConfig::default(), key_path.to_str().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn key_file_is_generated_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("audit.key");
        let key1 = load_or_create_key(key_path.to_str().unwrap()).unwrap();
        let key2 = load_or_create_key(key_path.to_str().unwrap()).unwrap();
        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 32);

        let meta = std::fs::metadata(&key_path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o400);
    }

    #[tokio::test]
    async fn direct_write_actions_bypass_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let logger = test_logger(&dir).await;

        logger
            .log(AuditEvent::new("alice", "login", "session", "10.0.0.1", true))
            .await;

        // No flush call was made, yet the record is already visible because
        // "login" is in the direct-write set.
        assert_eq!(logger.verify_chain().await.unwrap(), None);
        let count: i64 = logger
            .store
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn buffered_events_flush_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let logger = test_logger(&dir).await;

        for i in 0..3 {
            logger
                .log(AuditEvent::new(
                    "bob",
                    "list_pools",
                    "zfs",
                    "127.0.0.1",
                    true,
                ).with_details(format!("call {i}")))
                .await;
        }
        let count_before: i64 = logger
            .store
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count_before, 0, "buffered events are not yet persisted");

        logger.flush().await;
        let count_after: i64 = logger
            .store
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count_after, 3);
        assert_eq!(logger.verify_chain().await.unwrap(), None);
    }

    /// End-to-end scenario: log three events, tamper with the
    /// middle one's `details` directly in the store, and confirm the
    /// verifier flags tampering starting exactly at that record.
    #[tokio::test]
    async fn tampering_with_an_interior_record_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let logger = test_logger(&dir).await;

        for action in ["login", "list_pools", "logout"] {
            logger
                .log(AuditEvent::new("alice", action, "session", "10.0.0.1", true))
                .await;
        }
        assert_eq!(logger.verify_chain().await.unwrap(), None);

        let b_id: i64 = logger
            .store
            .with_conn(|c| {
                Ok(c.query_row(
                    "SELECT id FROM audit_log WHERE action = 'list_pools'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .await
            .unwrap();

        logger
            .store
            .with_conn(move |c| {
                c.execute(
                    "UPDATE audit_log SET details = 'forged' WHERE id = ?1",
                    [b_id],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(logger.verify_chain().await.unwrap(), Some(b_id));
    }
}
