//! `WebSocket` transport adapter.
//!
//! Clients connect to `GET /ws/state`. Each connection registers a
//! [`ChannelTransport`] with the hub and forwards every
//! [`StateBroadcast`](resonance_types::StateBroadcast) it receives as a
//! JSON text frame. The first frame is always the current full state.
//!
//! A slow socket backs up into the hub, which collapses pending snapshots
//! for this connection only.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use resonance_core::hub::ChannelTransport;
use tracing::{debug, warn};

use crate::state::{AppState, STREAM_BUFFER};

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming state broadcasts.
///
/// # Route
///
/// `GET /ws/state`
pub async fn ws_state(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Handle the `WebSocket` lifecycle: subscribe with the hub and forward
/// each broadcast as a text frame until either side closes.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let (transport, mut rx) = ChannelTransport::pair(STREAM_BUFFER);
    let subscriber_id = state.hub.subscribe(Box::new(transport));
    debug!(%subscriber_id, "WebSocket client connected");

    loop {
        tokio::select! {
            // Next broadcast from the hub.
            message = rx.recv() => {
                let Some(message) = message else {
                    debug!(%subscriber_id, "hub dropped subscriber, closing WebSocket");
                    break;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!(%subscriber_id, "Failed to serialize state broadcast: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    debug!(%subscriber_id, "WebSocket client disconnected (send failed)");
                    break;
                }
            }
            // Client frames: close, ping, or ignored input.
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%subscriber_id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(%subscriber_id, "WebSocket client disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(%subscriber_id, "WebSocket error: {e}");
                        break;
                    }
                    _ => {
                        // Streams are one-way; contributions go through POST.
                    }
                }
            }
        }
    }

    state.hub.unsubscribe(subscriber_id);
}
