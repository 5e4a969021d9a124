// src/core/hub/mod.rs

//! Fan-out of typed events to connected WebSocket clients, matching the
//! teacher's pub/sub fan-out shape: a registry of per-client send handles
//! behind a single lock, `broadcast()` never awaiting while the lock is
//! held, backpressure handled by dropping rather than blocking a publisher
//! on a slow client.

use crate::core::metrics::{HUB_CLIENTS, HUB_EVENTS_DROPPED_TOTAL};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::warn;

/// Severity tag carried by every hub event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Critical,
    Clear,
}

/// A single event pushed to every connected monitor client.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: i64,
    pub data: serde_json::Value,
    pub level: Level,
}

impl Event {
    pub fn new(event_type: impl Into<String>, level: Level, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: now_unix(),
            data,
            level,
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub type ClientId = u64;

const CLIENT_CHANNEL_CAPACITY: usize = 64;

/// A connected client's outbound handle, held by the hub's registry.
struct ClientHandle {
    sender: mpsc::Sender<Event>,
}

/// Registry of connected WebSocket clients plus non-blocking broadcast.
pub struct Hub {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers a new client, returning its id and the receiving half of
    /// its outbound channel. The caller (the WebSocket route handler) is
    /// responsible for forwarding received events to the socket and for
    /// calling [`Hub::unregister`] once the socket closes.
    pub async fn register(&self) -> (ClientId, mpsc::Receiver<Event>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        self.clients.write().await.insert(id, ClientHandle { sender: tx });
        HUB_CLIENTS.inc();
        (id, rx)
    }

    pub async fn unregister(&self, id: ClientId) {
        if self.clients.write().await.remove(&id).is_some() {
            HUB_CLIENTS.dec();
        }
    }

    /// Publishes `event` to every connected client. Uses `try_send` so a
    /// slow or dead client can never block the publisher; on a full channel
    /// the event is dropped for that client and a warning logged.
    pub async fn broadcast(&self, event: Event) {
        let clients = self.clients.read().await;
        for (id, handle) in clients.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = handle.sender.try_send(event.clone()) {
                HUB_EVENTS_DROPPED_TOTAL.inc();
                warn!(client_id = id, event = %event.event_type, "dropping hub event: client channel full");
            }
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_broadcast_delivers_event() {
        let hub = Hub::new();
        let (id, mut rx) = hub.register().await;
        hub.broadcast(Event::new("test", Level::Info, serde_json::json!({}))).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, "test");
        hub.unregister(id).await;
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn full_channel_drops_rather_than_blocks() {
        let hub = Hub::new();
        let (_id, _rx) = hub.register().await; // receiver kept alive, never drained
        for _ in 0..(CLIENT_CHANNEL_CAPACITY + 10) {
            hub.broadcast(Event::new("spam", Level::Info, serde_json::json!({}))).await;
        }
        // no panic, no deadlock: broadcast completed despite a full channel.
    }
}
