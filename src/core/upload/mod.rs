// src/core/upload/mod.rs

//! Chunked upload sessions, identified by a deterministic id
//! derived from filename + total size so retried first-chunk requests land
//! on the same session instead of creating duplicates. Each session is
//! guarded by its own mutex nested under the manager's outer map mutex, so
//! chunk uploads for different sessions don't serialize on each other.

use crate::core::DPlaneError;
use crate::core::audit::{AuditEvent, AuditLogger};
use crate::core::metrics::{UPLOADS_COMPLETED_TOTAL, UPLOADS_IN_PROGRESS};
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub index: usize,
    pub size: u64,
    pub checksum: String,
    pub received_at: Instant,
}

struct UploadSessionInner {
    destination: PathBuf,
    total_chunks: usize,
    total_size: u64,
    chunks: HashMap<usize, ChunkRecord>,
    started_at: Instant,
    last_activity: Instant,
}

/// Public, serializable view of a session for status endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UploadStatus {
    pub upload_id: String,
    pub received_chunks: usize,
    pub total_chunks: usize,
    pub total_size: u64,
    pub complete: bool,
}

pub struct UploadManager {
    scratch_dir: PathBuf,
    chunk_timeout: Duration,
    sessions: Mutex<HashMap<String, Arc<Mutex<UploadSessionInner>>>>,
}

/// Deterministic upload id: a retried first-chunk request for the same
/// filename+size lands on the same session rather than creating a duplicate.
pub fn upload_id(filename: &str, total_size: u64) -> String {
    let mut hasher = Md5::new();
    hasher.update(filename.as_bytes());
    hasher.update(b"\0");
    hasher.update(total_size.to_le_bytes());
    hex::encode(hasher.finalize())
}

impl UploadManager {
    pub fn new(scratch_dir: impl Into<PathBuf>, chunk_timeout: Duration) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            chunk_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn session_dir(&self, upload_id: &str) -> PathBuf {
        self.scratch_dir.join(upload_id)
    }

    /// Accepts one chunk. Creates the session on its first chunk. Returns
    /// `Some(destination)` once every chunk has been received; the session
    /// stays behind (so a status poll in this window already reports
    /// `complete: true`) while assembly itself runs as a background task
    /// started by the caller via [`assemble_and_finish`]. Returns `None`
    /// while the upload is still in progress.
    ///
    /// [`assemble_and_finish`]: UploadManager::assemble_and_finish
    #[allow(clippy::too_many_arguments)]
    pub async fn receive_chunk(
        &self,
        filename: &str,
        destination: PathBuf,
        chunk_index: usize,
        total_chunks: usize,
        total_size: u64,
        data: &[u8],
    ) -> Result<Option<PathBuf>, DPlaneError> {
        if chunk_index >= total_chunks || total_chunks == 0 {
            return Err(DPlaneError::InvalidInput(format!(
                "chunk index {chunk_index} out of range for {total_chunks} total chunks"
            )));
        }

        let id = upload_id(filename, total_size);
        let session = {
            let mut sessions = self.sessions.lock().await;
            let is_new = !sessions.contains_key(&id);
            let session = sessions
                .entry(id.clone())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(UploadSessionInner {
                        destination: destination.clone(),
                        total_chunks,
                        total_size,
                        chunks: HashMap::new(),
                        started_at: Instant::now(),
                        last_activity: Instant::now(),
                    }))
                })
                .clone();
            if is_new {
                UPLOADS_IN_PROGRESS.inc();
            }
            session
        };

        let dir = self.session_dir(&id);
        tokio::fs::create_dir_all(&dir).await?;
        let chunk_path = dir.join(format!("chunk_{chunk_index}"));

        let mut hasher = Md5::new();
        hasher.update(data);
        let checksum = hex::encode(hasher.finalize());

        let mut file = tokio::fs::File::create(&chunk_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;

        let ready = {
            let mut inner = session.lock().await;
            inner.chunks.insert(
                chunk_index,
                ChunkRecord { index: chunk_index, size: data.len() as u64, checksum, received_at: Instant::now() },
            );
            inner.last_activity = Instant::now();
            inner.chunks.len() == inner.total_chunks
        };

        if !ready {
            return Ok(None);
        }

        let destination = session.lock().await.destination.clone();
        Ok(Some(destination))
    }

    /// Assembles a session's chunks into the final file. Started by the
    /// caller as a background task once [`receive_chunk`] reports every
    /// chunk received, so the triggering request returns without waiting on
    /// the copy; the session — and the `complete: true` its presence implies
    /// — stays visible for the whole window and is only removed once
    /// assembly actually succeeds. A failure leaves the session for a retry
    /// or the sweep to clean up.
    ///
    /// [`receive_chunk`]: UploadManager::receive_chunk
    pub async fn assemble_and_finish(self: Arc<Self>, id: String, audit: Arc<AuditLogger>) {
        let session = {
            let sessions = self.sessions.lock().await;
            sessions.get(&id).cloned()
        };
        let Some(session) = session else { return };

        match self.assemble(&id, &session).await {
            Ok(dest) => {
                self.sessions.lock().await.remove(&id);
                UPLOADS_IN_PROGRESS.dec();
                UPLOADS_COMPLETED_TOTAL.inc();
                audit
                    .log(AuditEvent::new("system", "file_uploaded", dest.to_string_lossy(), "internal", true))
                    .await;
            }
            Err(e) => {
                error!(upload_id = %id, error = %e, "upload assembly failed, session retained for retry");
            }
        }
    }

    /// Copies chunks in strict order into the final file. On any I/O error
    /// the caller must not treat the upload as complete — the session stays
    /// so a retry (or the sweep) can clean it up.
    async fn assemble(&self, id: &str, session: &Arc<Mutex<UploadSessionInner>>) -> Result<PathBuf, DPlaneError> {
        let (destination, total_chunks, dir) = {
            let inner = session.lock().await;
            (inner.destination.clone(), inner.total_chunks, self.session_dir(id))
        };

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = tokio::fs::File::create(&destination).await?;

        for i in 0..total_chunks {
            let chunk_path = dir.join(format!("chunk_{i}"));
            let mut chunk_file = tokio::fs::File::open(&chunk_path).await?;
            let mut buf = Vec::new();
            chunk_file.read_to_end(&mut buf).await?;
            out.write_all(&buf).await?;
        }
        out.sync_all().await?;
        drop(out);

        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&destination, std::fs::Permissions::from_mode(0o644)).await?;

        for i in 0..total_chunks {
            let _ = tokio::fs::remove_file(dir.join(format!("chunk_{i}"))).await;
        }
        let _ = tokio::fs::remove_dir(&dir).await;

        info!(upload_id = %id, destination = %destination.display(), "upload assembled");
        Ok(destination)
    }

    pub async fn status(&self, id: &str) -> Option<UploadStatus> {
        let sessions = self.sessions.lock().await;
        let session = sessions.get(id)?.clone();
        drop(sessions);
        let inner = session.lock().await;
        Some(UploadStatus {
            upload_id: id.to_string(),
            received_chunks: inner.chunks.len(),
            total_chunks: inner.total_chunks,
            total_size: inner.total_size,
            complete: inner.chunks.len() == inner.total_chunks,
        })
    }

    /// Cancels an in-progress upload: removes its scratch directory and
    /// drops the session. Safe to call concurrently with ongoing chunk
    /// uploads — the chunk write may still land on disk, but the sweep or a
    /// later cancel will clean up an orphaned directory.
    pub async fn cancel(&self, id: &str) -> Result<(), DPlaneError> {
        if self.sessions.lock().await.remove(id).is_some() {
            UPLOADS_IN_PROGRESS.dec();
        }
        let dir = self.session_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes any session whose last activity is older than the configured
    /// chunk timeout, along with its scratch directory.
    pub async fn sweep(&self) {
        let stale: Vec<String> = {
            let sessions = self.sessions.lock().await;
            let mut stale = Vec::new();
            for (id, session) in sessions.iter() {
                let inner = session.lock().await;
                if inner.last_activity.elapsed() > self.chunk_timeout {
                    stale.push(id.clone());
                }
            }
            stale
        };

        for id in stale {
            warn!(upload_id = %id, "sweeping stale upload session");
            if self.sessions.lock().await.remove(&id).is_some() {
                UPLOADS_IN_PROGRESS.dec();
            }
            let dir = self.session_dir(&id);
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(upload_id = %id, error = %e, "failed to remove stale upload scratch directory");
                }
            }
        }
    }

    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = shutdown.recv() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::core::store::Store;

    async fn test_audit() -> Arc<AuditLogger> {
        let store = Store::open(":memory:").await.unwrap();
        let key_path = std::env::temp_dir().join(format!("dplaneos-upload-test-key-{}", std::process::id()));
        Arc::new(
            AuditLogger::new(store, AuditConfig::default(), key_path.to_str().unwrap())
                .await
                .unwrap(),
        )
    }

    #[test]
    fn upload_id_is_deterministic() {
        assert_eq!(upload_id("a.txt", 100), upload_id("a.txt", 100));
        assert_ne!(upload_id("a.txt", 100), upload_id("b.txt", 100));
    }

    #[tokio::test]
    async fn single_chunk_upload_assembles_in_the_background() {
        let dir = std::env::temp_dir().join(format!("dplaneos-upload-test-{}", std::process::id()));
        let mgr = Arc::new(UploadManager::new(dir.join("scratch"), Duration::from_secs(1800)));
        let audit = test_audit().await;
        let dest = dir.join("final.bin");
        let id = upload_id("final.bin", 4);

        let result = mgr.receive_chunk("final.bin", dest.clone(), 0, 1, 4, b"data").await.unwrap();
        assert_eq!(result, Some(dest.clone()));

        // Assembly hasn't run yet, but the session is still present with
        // every chunk received, so a status poll already reports complete.
        let status = mgr.status(&id).await.unwrap();
        assert!(status.complete);

        mgr.clone().assemble_and_finish(id.clone(), audit).await;
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"data");
        assert!(mgr.status(&id).await.is_none(), "session is removed once assembly finishes");

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn out_of_order_chunks_assemble_in_correct_order() {
        let dir = std::env::temp_dir().join(format!("dplaneos-upload-test-ooo-{}", std::process::id()));
        let mgr = Arc::new(UploadManager::new(dir.join("scratch"), Duration::from_secs(1800)));
        let audit = test_audit().await;
        let dest = dir.join("final.bin");
        let id = upload_id("final.bin", 8);

        let r1 = mgr.receive_chunk("final.bin", dest.clone(), 1, 2, 8, b"WORLD").await.unwrap();
        assert_eq!(r1, None);
        let r2 = mgr.receive_chunk("final.bin", dest.clone(), 0, 2, 8, b"HELLO").await.unwrap();
        assert_eq!(r2, Some(dest.clone()));

        mgr.clone().assemble_and_finish(id, audit).await;
        let contents = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(contents, b"HELLOWORLD");

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn rejects_chunk_index_out_of_range() {
        let dir = std::env::temp_dir().join(format!("dplaneos-upload-test-oob-{}", std::process::id()));
        let mgr = UploadManager::new(dir.join("scratch"), Duration::from_secs(1800));
        let err = mgr
            .receive_chunk("f.bin", dir.join("f.bin"), 5, 2, 4, b"data")
            .await
            .unwrap_err();
        assert!(matches!(err, DPlaneError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn cancel_removes_session_and_scratch_dir() {
        let dir = std::env::temp_dir().join(format!("dplaneos-upload-test-cancel-{}", std::process::id()));
        let mgr = UploadManager::new(dir.join("scratch"), Duration::from_secs(1800));
        mgr.receive_chunk("big.bin", dir.join("big.bin"), 0, 2, 8, b"HELLO").await.unwrap();

        let id = upload_id("big.bin", 8);
        assert!(mgr.status(&id).await.is_some());
        mgr.cancel(&id).await.unwrap();
        assert!(mgr.status(&id).await.is_none());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
