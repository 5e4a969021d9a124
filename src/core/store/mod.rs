// src/core/store/mod.rs

//! The embedded relational store: a `rusqlite` connection opened in WAL mode,
//! shared behind a blocking mutex and accessed only from `spawn_blocking`
//! tasks so the async executor is never stalled on store I/O.

mod schema;

use crate::core::DPlaneError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Handle to the embedded relational store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (creating if absent) the store at `path`, applies pragmas per
    /// the daemon's store-concurrency requirements, and runs pending migrations.
    pub async fn open(path: &str) -> Result<Self, DPlaneError> {
        let path = path.to_string();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, DPlaneError> {
            if let Some(parent) = Path::new(&path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "FULL")?;
            conn.pragma_update(None, "busy_timeout", 30_000i64)?;
            conn.pragma_update(None, "wal_autocheckpoint", 1000i64)?;
            schema::migrate(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| DPlaneError::Internal(format!("store open task panicked: {e}")))??;

        info!("embedded store opened and migrated");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive access to the underlying connection, off the
    /// async executor. Every store operation in the daemon goes through this.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T, DPlaneError>
    where
        F: FnOnce(&Connection) -> Result<T, DPlaneError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.blocking_lock();
            f(&guard)
        })
        .await
        .map_err(|e| DPlaneError::Internal(format!("store task panicked: {e}")))?
    }

    /// Checkpoints the write-ahead log, bounding its growth. Called on a
    /// periodic ticker from the Audit Logger lifecycle.
    pub async fn checkpoint(&self) -> Result<(), DPlaneError> {
        self.with_conn(|conn| {
            conn.pragma_update(None, "wal_checkpoint", "TRUNCATE")?;
            Ok(())
        })
        .await
    }

    /// Copies the whole database file to `dest` via `VACUUM INTO`, providing
    /// a hot backup independent of the main file and its WAL companions.
    pub async fn backup_to(&self, dest: String) -> Result<(), DPlaneError> {
        self.with_conn(move |conn| {
            conn.execute("VACUUM INTO ?1", [&dest])?;
            Ok(())
        })
        .await
    }
}
