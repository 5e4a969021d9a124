// src/core/cluster/manager.rs

//! A registry of active/standby peers with periodic health
//! pings. There is no consensus protocol — promotion between active and
//! standby is explicit (`set_peer_role`), and each node derives its own
//! view of the cluster from what it currently knows about its peers.

use crate::core::DPlaneError;
use crate::core::audit::{AuditEvent, AuditLogger};
use crate::core::hub::{Event, Hub, Level};
use crate::core::metrics::CLUSTER_QUORATE;
use crate::core::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const MISSED_BEATS_BEFORE_UNREACHABLE: u32 = 2;
const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Active,
    Standby,
}

impl PeerRole {
    fn as_str(self) -> &'static str {
        match self {
            PeerRole::Active => "active",
            PeerRole::Standby => "standby",
        }
    }

    fn from_str(s: &str) -> Self {
        if s == "active" { PeerRole::Active } else { PeerRole::Standby }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Healthy,
    Unreachable,
}

impl PeerState {
    fn as_str(self) -> &'static str {
        match self {
            PeerState::Healthy => "healthy",
            PeerState::Unreachable => "unreachable",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub address: String,
    pub role: PeerRole,
    pub state: PeerState,
    pub last_seen: i64,
    pub missed_beats: u32,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub local_id: String,
    pub local_role: PeerRole,
    pub peers: Vec<PeerInfo>,
    pub active_node: Option<String>,
    pub quorum: bool,
}

pub struct ClusterManager {
    local_id: String,
    local_address: String,
    version: String,
    store: Store,
    http: reqwest::Client,
    peers: Mutex<HashMap<String, PeerInfo>>,
}

impl ClusterManager {
    pub async fn new(
        local_id: String,
        local_address: String,
        version: String,
        store: Store,
    ) -> Result<Self, DPlaneError> {
        let loaded = load_peers(&store).await?;
        let http = reqwest::Client::builder()
            .timeout(HEALTH_PING_TIMEOUT)
            .build()
            .map_err(|e| DPlaneError::Internal(format!("building cluster http client: {e}")))?;
        Ok(Self {
            local_id,
            local_address,
            version,
            store,
            http,
            peers: Mutex::new(loaded.into_iter().map(|p| (p.id.clone(), p)).collect()),
        })
    }

    /// Registers a new peer. Rejects attempts to register the local node id.
    pub async fn register_peer(&self, id: &str, address: &str, version: &str) -> Result<(), DPlaneError> {
        if id == self.local_id {
            return Err(DPlaneError::Conflict("cannot register the local node as a peer".into()));
        }
        let peer = PeerInfo {
            id: id.to_string(),
            address: address.to_string(),
            role: PeerRole::Standby,
            state: PeerState::Unreachable,
            last_seen: now_unix(),
            missed_beats: 0,
            version: version.to_string(),
        };
        persist_peer(&self.store, &peer).await?;
        self.peers.lock().await.insert(peer.id.clone(), peer);
        Ok(())
    }

    /// Records an inbound heartbeat from a peer. Auto-registers unknown node ids.
    pub async fn record_heartbeat(
        &self,
        id: &str,
        address: &str,
        role: PeerRole,
        version: &str,
    ) -> Result<(), DPlaneError> {
        if id == self.local_id {
            return Err(DPlaneError::Conflict("heartbeat from local node id".into()));
        }
        let mut peers = self.peers.lock().await;
        let peer = peers.entry(id.to_string()).or_insert_with(|| PeerInfo {
            id: id.to_string(),
            address: address.to_string(),
            role,
            state: PeerState::Healthy,
            last_seen: now_unix(),
            missed_beats: 0,
            version: version.to_string(),
        });
        peer.address = address.to_string();
        peer.role = role;
        peer.version = version.to_string();
        peer.state = PeerState::Healthy;
        peer.missed_beats = 0;
        peer.last_seen = now_unix();
        let snapshot = peer.clone();
        drop(peers);
        persist_peer(&self.store, &snapshot).await
    }

    /// Explicit promotion/demotion. No consensus: the caller is responsible
    /// for not creating two simultaneous actives.
    pub async fn set_peer_role(&self, id: &str, role: PeerRole) -> Result<(), DPlaneError> {
        let mut peers = self.peers.lock().await;
        let peer = peers
            .get_mut(id)
            .ok_or_else(|| DPlaneError::NotFound(format!("peer '{id}'")))?;
        peer.role = role;
        let snapshot = peer.clone();
        drop(peers);
        persist_peer(&self.store, &snapshot).await
    }

    /// Removes a registered peer from the map and its persisted row.
    pub async fn remove_peer(&self, id: &str) -> Result<(), DPlaneError> {
        let removed = self.peers.lock().await.remove(id);
        if removed.is_none() {
            return Err(DPlaneError::NotFound(format!("peer '{id}'")));
        }
        delete_peer(&self.store, id).await
    }

    /// One health-ping tick: pings every known peer's `/health` endpoint
    /// concurrently, each with its own deadline, and updates reachability.
    pub async fn tick(&self, hub: &Hub, audit: &AuditLogger) {
        let snapshot: Vec<PeerInfo> = self.peers.lock().await.values().cloned().collect();
        let mut handles = Vec::with_capacity(snapshot.len());
        for peer in snapshot {
            let http = self.http.clone();
            handles.push(tokio::spawn(async move {
                let url = format!("http://{}/health", peer.address);
                let reachable = tokio::time::timeout(HEALTH_PING_TIMEOUT, http.get(&url).send())
                    .await
                    .ok()
                    .and_then(|r| r.ok())
                    .map(|r| r.status().is_success())
                    .unwrap_or(false);
                (peer.id, reachable)
            }));
        }

        for handle in handles {
            let Ok((id, reachable)) = handle.await else { continue };
            let mut peers = self.peers.lock().await;
            let Some(peer) = peers.get_mut(&id) else { continue };
            let was_healthy = peer.state == PeerState::Healthy;
            if reachable {
                peer.missed_beats = 0;
                peer.state = PeerState::Healthy;
                peer.last_seen = now_unix();
            } else {
                peer.missed_beats += 1;
                if peer.missed_beats >= MISSED_BEATS_BEFORE_UNREACHABLE {
                    peer.state = PeerState::Unreachable;
                }
            }
            let became_unreachable = was_healthy && peer.state == PeerState::Unreachable;
            let became_healthy = !was_healthy && peer.state == PeerState::Healthy;
            let snapshot = peer.clone();
            drop(peers);

            if let Err(e) = persist_peer(&self.store, &snapshot).await {
                warn!(peer = %id, error = %e, "failed to persist peer state");
            }

            if became_unreachable {
                warn!(peer = %id, "cluster peer became unreachable");
                hub.broadcast(Event::new(
                    "cluster_peer",
                    Level::Warning,
                    serde_json::json!({"id": id, "state": "unreachable"}),
                ))
                .await;
                audit
                    .log(AuditEvent::new("system", "cluster_peer_unreachable", &id, "internal", true))
                    .await;
            } else if became_healthy {
                info!(peer = %id, "cluster peer recovered");
                hub.broadcast(Event::new(
                    "cluster_peer",
                    Level::Info,
                    serde_json::json!({"id": id, "state": "healthy"}),
                ))
                .await;
            }
        }
    }

    /// Derives this node's own role and the cluster's overall quorum status
    /// from what it currently knows about its peers. Active if no reachable
    /// peer currently reports itself active; standby otherwise.
    pub async fn status(&self) -> ClusterStatus {
        let peers: Vec<PeerInfo> = self.peers.lock().await.values().cloned().collect();

        let another_peer_is_active = peers
            .iter()
            .any(|p| p.role == PeerRole::Active && p.state == PeerState::Healthy);
        let local_role = if another_peer_is_active { PeerRole::Standby } else { PeerRole::Active };

        let active_node = if local_role == PeerRole::Active {
            Some(self.local_id.clone())
        } else {
            peers
                .iter()
                .find(|p| p.role == PeerRole::Active && p.state == PeerState::Healthy)
                .map(|p| p.id.clone())
        };

        let total = peers.len() + 1;
        let reachable = peers.iter().filter(|p| p.state == PeerState::Healthy).count() + 1;
        let quorum = reachable > total / 2;
        CLUSTER_QUORATE.set(if quorum { 1.0 } else { 0.0 });

        ClusterStatus {
            local_id: self.local_id.clone(),
            local_role,
            peers,
            active_node,
            quorum,
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn run(
        self: Arc<Self>,
        hub: Arc<Hub>,
        audit: Arc<AuditLogger>,
        interval: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(&hub, &audit).await,
                _ = shutdown.recv() => break,
            }
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn load_peers(store: &Store) -> Result<Vec<PeerInfo>, DPlaneError> {
    store
        .with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, address, role, state, last_seen, missed_beats, version FROM cluster_nodes",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let role: String = row.get(2)?;
                let state: String = row.get(3)?;
                out.push(PeerInfo {
                    id: row.get(0)?,
                    address: row.get(1)?,
                    role: PeerRole::from_str(&role),
                    state: if state == "healthy" { PeerState::Healthy } else { PeerState::Unreachable },
                    last_seen: row.get(4)?,
                    missed_beats: row.get::<_, i64>(5)? as u32,
                    version: row.get(6)?,
                });
            }
            Ok(out)
        })
        .await
}

async fn persist_peer(store: &Store, peer: &PeerInfo) -> Result<(), DPlaneError> {
    let peer = peer.clone();
    store
        .with_conn(move |conn| {
            conn.execute(
                "INSERT INTO cluster_nodes (id, address, role, state, last_seen, missed_beats, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    address = excluded.address,
                    role = excluded.role,
                    state = excluded.state,
                    last_seen = excluded.last_seen,
                    missed_beats = excluded.missed_beats,
                    version = excluded.version",
                rusqlite::params![
                    peer.id,
                    peer.address,
                    peer.role.as_str(),
                    peer.state.as_str(),
                    peer.last_seen,
                    peer.missed_beats as i64,
                    peer.version,
                ],
            )?;
            Ok(())
        })
        .await
}

async fn delete_peer(store: &Store, id: &str) -> Result<(), DPlaneError> {
    let id = id.to_string();
    store
        .with_conn(move |conn| {
            conn.execute("DELETE FROM cluster_nodes WHERE id = ?1", rusqlite::params![id])?;
            Ok(())
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::Store;

    async fn test_manager(local_id: &str) -> ClusterManager {
        let store = Store::open(":memory:").await.unwrap();
        ClusterManager::new(local_id.to_string(), "127.0.0.1:9000".into(), "test".into(), store)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn rejects_registering_the_local_node() {
        let mgr = test_manager("node-a").await;
        let err = mgr.register_peer("node-a", "127.0.0.1:9001", "test").await.unwrap_err();
        assert!(matches!(err, DPlaneError::Conflict(_)));
    }

    #[tokio::test]
    async fn single_node_is_active_with_quorum() {
        let mgr = test_manager("node-a").await;
        let status = mgr.status().await;
        assert_eq!(status.local_role, PeerRole::Active);
        assert!(status.quorum);
        assert_eq!(status.active_node.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn becomes_standby_when_another_peer_reports_active_and_healthy() {
        let mgr = test_manager("node-b").await;
        mgr.register_peer("node-a", "127.0.0.1:9001", "test").await.unwrap();
        mgr.record_heartbeat("node-a", "127.0.0.1:9001", PeerRole::Active, "test")
            .await
            .unwrap();
        let status = mgr.status().await;
        assert_eq!(status.local_role, PeerRole::Standby);
        assert_eq!(status.active_node.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn unknown_heartbeat_auto_registers() {
        let mgr = test_manager("node-a").await;
        mgr.record_heartbeat("node-c", "127.0.0.1:9002", PeerRole::Standby, "test")
            .await
            .unwrap();
        let status = mgr.status().await;
        assert_eq!(status.peers.len(), 1);
    }

    #[tokio::test]
    async fn set_peer_role_requires_known_peer() {
        let mgr = test_manager("node-a").await;
        let err = mgr.set_peer_role("ghost", PeerRole::Active).await.unwrap_err();
        assert!(matches!(err, DPlaneError::NotFound(_)));
    }

    /// Register -> remove -> status: peer absent.
    #[tokio::test]
    async fn removed_peer_is_absent_from_status() {
        let mgr = test_manager("node-a").await;
        mgr.register_peer("node-b", "127.0.0.1:9001", "test").await.unwrap();
        assert_eq!(mgr.status().await.peers.len(), 1);

        mgr.remove_peer("node-b").await.unwrap();
        assert_eq!(mgr.status().await.peers.len(), 0);
    }

    #[tokio::test]
    async fn remove_peer_requires_known_peer() {
        let mgr = test_manager("node-a").await;
        let err = mgr.remove_peer("ghost").await.unwrap_err();
        assert!(matches!(err, DPlaneError::NotFound(_)));
    }
}
