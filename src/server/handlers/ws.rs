// src/server/handlers/ws.rs

//! `/ws/monitor`: the client-facing side of the WebSocket hub. The server
//! only ever pushes; inbound client frames are drained and discarded so a
//! client sending anything (or just a ping) doesn't desync the connection.

use crate::server::context::Core;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use std::sync::Arc;
use tracing::debug;

pub async fn monitor(State(core): State<Arc<Core>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, core))
}

async fn handle_socket(mut socket: WebSocket, core: Arc<Core>) {
    let (client_id, mut events) = core.hub.register().await;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let Ok(payload) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => { debug!(error = %e, "monitor socket error"); break; }
                    _ => {}
                }
            }
        }
    }

    core.hub.unregister(client_id).await;
}
