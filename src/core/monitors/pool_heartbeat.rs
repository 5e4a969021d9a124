// src/core/monitors/pool_heartbeat.rs

//! One instance per detected ZFS pool, ticking on its own
//! interval to probe pool status and mount-point liveness. Fires the hub
//! only on a transition of `last_error`, never on repeat, matching the
//! heartbeat-alert ordering guarantee.

use crate::core::DPlaneError;
use crate::core::audit::{AuditEvent, AuditLogger};
use crate::core::exec::{CommandExecutor, ExecClass, whitelist};
use crate::core::hub::{Event, Hub, Level};
use crate::core::metrics::POOL_HEARTBEAT_HEALTHY;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info};

const HEARTBEAT_FILE: &str = ".dplaneos_heartbeat";

#[derive(Debug, Clone, Default)]
struct HeartbeatState {
    last_success: Option<Instant>,
    last_error: Option<String>,
}

/// Per-pool heartbeat: periodic `zpool status` + mount-point read/write probe.
pub struct PoolHeartbeat {
    pool: String,
    mount_point: PathBuf,
    interval: Duration,
    state: Mutex<HeartbeatState>,
}

impl PoolHeartbeat {
    pub fn new(pool: impl Into<String>, mount_point: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            pool: pool.into(),
            mount_point: mount_point.into(),
            interval,
            state: Mutex::new(HeartbeatState::default()),
        }
    }

    pub fn pool_name(&self) -> &str {
        &self.pool
    }

    /// True iff the last probe succeeded AND that success happened within
    /// two check intervals (i.e. we haven't silently stalled).
    pub async fn is_healthy(&self) -> bool {
        let state = self.state.lock().await;
        state.last_error.is_none()
            && state
                .last_success
                .is_some_and(|t| t.elapsed() <= self.interval * 2)
    }

    /// Runs one probe cycle, updating internal state and firing the hub on
    /// any `last_error` transition.
    pub async fn tick(&self, exec: &CommandExecutor, hub: &Hub, audit: &AuditLogger) {
        let result = self.probe(exec).await;
        POOL_HEARTBEAT_HEALTHY
            .with_label_values(&[&self.pool])
            .set(if result.is_ok() { 1.0 } else { 0.0 });
        let mut state = self.state.lock().await;

        match result {
            Ok(()) => {
                state.last_success = Some(Instant::now());
                let was_erroring = state.last_error.take().is_some();
                drop(state);
                if was_erroring {
                    info!(pool = %self.pool, "pool heartbeat recovered");
                    hub.broadcast(Event::new(
                        "pool_heartbeat",
                        Level::Clear,
                        serde_json::json!({"pool": self.pool, "status": "online"}),
                    ))
                    .await;
                }
            }
            Err(e) => {
                let message = e.to_string();
                let transitioned = state.last_error.as_deref() != Some(message.as_str());
                state.last_error = Some(message.clone());
                drop(state);

                if transitioned {
                    error!(pool = %self.pool, error = %message, "pool heartbeat failing");
                    hub.broadcast(Event::new(
                        "pool_heartbeat",
                        Level::Critical,
                        serde_json::json!({
                            "pool": self.pool,
                            "status": message,
                            "suggested_action": "inspect `zpool status` and underlying devices",
                        }),
                    ))
                    .await;
                    audit
                        .log(
                            AuditEvent::new("system", "pool_heartbeat_failed", &self.pool, "internal", false)
                                .with_details(message),
                        )
                        .await;
                }
            }
        }
    }

    async fn probe(&self, exec: &CommandExecutor) -> Result<(), DPlaneError> {
        whitelist::check(whitelist::Kind::PoolName, &self.pool)?;

        let status = exec
            .run(ExecClass::Zfs, "zpool", &["status", &self.pool])
            .await?;
        if status.combined_output.contains("SUSPENDED") {
            return Err(DPlaneError::DependencyUnavailable(format!(
                "pool '{}' is SUSPENDED",
                self.pool
            )));
        }
        if status.combined_output.contains("UNAVAIL") {
            return Err(DPlaneError::DependencyUnavailable(format!(
                "pool '{}' reports an UNAVAIL vdev",
                self.pool
            )));
        }

        self.liveness_probe().await
    }

    async fn liveness_probe(&self) -> Result<(), DPlaneError> {
        let path = self.mount_point.join(HEARTBEAT_FILE);
        let payload = format!("heartbeat:{}", now_unix());
        tokio::fs::write(&path, payload.as_bytes())
            .await
            .map_err(|e| {
                DPlaneError::DependencyUnavailable(format!(
                    "pool '{}' mount-point write failed: {e}",
                    self.pool
                ))
            })?;
        let read_back = tokio::fs::read(&path).await.map_err(|e| {
            DPlaneError::DependencyUnavailable(format!(
                "pool '{}' mount-point read failed: {e}",
                self.pool
            ))
        })?;
        if read_back != payload.as_bytes() {
            return Err(DPlaneError::DependencyUnavailable(format!(
                "pool '{}' mount-point liveness probe mismatch (frozen?)",
                self.pool
            )));
        }
        Ok(())
    }

    /// Runs the tick loop until `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        exec: CommandExecutor,
        hub: Arc<Hub>,
        audit: Arc<AuditLogger>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(&exec, &hub, &audit).await;
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuditConfig, ExecConfig};
    use crate::core::store::Store;

    async fn harness() -> (PoolHeartbeat, CommandExecutor, Arc<Hub>, Arc<AuditLogger>) {
        let dir = std::env::temp_dir().join(format!("dplaneos-hb-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let store = Store::open(&format!("{}/db.sqlite", dir.display())).await.unwrap();
        let audit = Arc::new(
            AuditLogger::new(store, AuditConfig::default(), &format!("{}/key", dir.display()))
                .await
                .unwrap(),
        );
        let hub = Hub::new();
        let exec = CommandExecutor::new(ExecConfig {
            fast_timeout_secs: 2,
            medium_timeout_secs: 2,
            zfs_timeout_secs: 2,
            slow_timeout_secs: 2,
        });
        let hb = PoolHeartbeat::new("tank", &dir, Duration::from_secs(30));
        (hb, exec, hub, audit)
    }

    #[tokio::test]
    async fn liveness_probe_roundtrips_payload() {
        let (hb, _exec, _hub, _audit) = harness().await;
        hb.liveness_probe().await.unwrap();
        assert!(hb.mount_point.join(HEARTBEAT_FILE).exists());
    }

    #[tokio::test]
    async fn rejects_pool_name_failing_whitelist() {
        let (_hb, exec, hub, audit) = harness().await;
        let evil = PoolHeartbeat::new("tank; rm -rf /", std::env::temp_dir(), Duration::from_secs(30));
        evil.tick(&exec, &hub, &audit).await;
        assert!(!evil.is_healthy().await);
    }

    #[tokio::test]
    async fn is_healthy_false_until_first_success() {
        let (hb, _exec, _hub, _audit) = harness().await;
        assert!(!hb.is_healthy().await);
    }
}
