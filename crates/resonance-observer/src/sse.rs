//! Server-Sent Events transport adapter.
//!
//! `GET /sse/state` streams one `state` event per delivered broadcast,
//! starting with the current full state. The subscription is released
//! when the client goes away and Axum drops the stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use resonance_core::hub::{ChannelTransport, SubscriptionHub};
use resonance_types::{StateBroadcast, SubscriberId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::state::{AppState, STREAM_BUFFER};

/// SSE event name carried by every frame.
pub const STATE_EVENT: &str = "state";

/// Unsubscribes from the hub when dropped.
struct Subscription {
    hub: Arc<SubscriptionHub>,
    id: SubscriberId,
    rx: mpsc::Receiver<StateBroadcast>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(subscriber_id = %self.id, "SSE client disconnected");
        self.hub.unsubscribe(self.id);
    }
}

/// Open a Server-Sent Events stream of state broadcasts.
///
/// # Route
///
/// `GET /sse/state`
pub async fn sse_state(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (transport, rx) = ChannelTransport::pair(STREAM_BUFFER);
    let id = state.hub.subscribe(Box::new(transport));
    debug!(subscriber_id = %id, "SSE client connected");

    let subscription = Subscription {
        hub: Arc::clone(&state.hub),
        id,
        rx,
    };

    let events = stream::unfold(subscription, |mut subscription| async move {
        loop {
            let message = subscription.rx.recv().await?;
            match Event::default().event(STATE_EVENT).json_data(&message) {
                Ok(event) => return Some((Ok(event), subscription)),
                Err(e) => {
                    warn!(subscriber_id = %subscription.id, "Failed to encode SSE event: {e}");
                }
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
