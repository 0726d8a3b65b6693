//! Fan-out of state changes to live subscribers.
//!
//! Each subscriber owns a bounded outbox and a dedicated writer task. The
//! store's notification path only ever touches outboxes, so a slow or dead
//! transport never delays a mutation or another subscriber.
//!
//! Delivery is lossy by construction: state is presence-based, so when an
//! outbox overflows its pending snapshots collapse to the newest one and the
//! subscriber is marked [`SubscriberPhase::Stalled`] until it drains.
//!
//! Versions delivered to one subscriber are strictly increasing.

pub mod transport;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use resonance_types::{AggregateState, StateBroadcast, SubscriberId, SubscriberPhase};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

pub use transport::{ChannelTransport, Transport, TransportError};

use crate::store::StateObserver;

/// Point-in-time view of one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberInfo {
    /// Subscriber identifier.
    pub id: SubscriberId,
    /// Lifecycle phase.
    pub phase: SubscriberPhase,
    /// Last version written to the transport.
    pub last_sent_version: Option<u64>,
    /// Messages waiting in the outbox.
    pub queued: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Outbox {
    phase: SubscriberPhase,
    queue: VecDeque<Arc<StateBroadcast>>,
    last_enqueued: Option<u64>,
    last_sent: Option<u64>,
}

enum Next {
    Send(Arc<StateBroadcast>),
    Idle,
    Stop,
}

#[derive(Debug)]
struct Subscriber {
    id: SubscriberId,
    outbox: Mutex<Outbox>,
    wake: Notify,
}

impl Subscriber {
    fn new(id: SubscriberId) -> Self {
        Self {
            id,
            outbox: Mutex::new(Outbox {
                phase: SubscriberPhase::Connecting,
                queue: VecDeque::new(),
                last_enqueued: None,
                last_sent: None,
            }),
            wake: Notify::new(),
        }
    }

    /// Queue `message` unless it is not newer than what was already queued.
    fn enqueue(&self, message: &Arc<StateBroadcast>, capacity: usize) {
        {
            let mut outbox = lock(&self.outbox);
            if outbox.phase.is_terminal() {
                return;
            }
            if outbox.last_enqueued.is_some_and(|v| v >= message.version) {
                return;
            }
            if outbox.queue.len() >= capacity {
                let dropped = outbox.queue.len();
                outbox.queue.clear();
                if outbox.phase != SubscriberPhase::Stalled {
                    warn!(
                        subscriber_id = %self.id,
                        dropped,
                        version = message.version,
                        "subscriber stalled, collapsing to latest snapshot"
                    );
                }
                outbox.phase = SubscriberPhase::Stalled;
            }
            outbox.queue.push_back(Arc::clone(message));
            outbox.last_enqueued = Some(message.version);
        }
        self.wake.notify_one();
    }

    fn next(&self) -> Next {
        let mut outbox = lock(&self.outbox);
        if outbox.phase.is_terminal() {
            return Next::Stop;
        }
        outbox.queue.pop_front().map_or(Next::Idle, Next::Send)
    }

    fn mark_sent(&self, version: u64) {
        let mut outbox = lock(&self.outbox);
        if outbox.phase.is_terminal() {
            return;
        }
        outbox.last_sent = Some(version);
        if outbox.queue.is_empty() && outbox.phase != SubscriberPhase::Active {
            if outbox.phase == SubscriberPhase::Stalled {
                debug!(subscriber_id = %self.id, version, "subscriber recovered");
            }
            outbox.phase = SubscriberPhase::Active;
        }
    }

    fn disconnect(&self) {
        {
            let mut outbox = lock(&self.outbox);
            outbox.phase = SubscriberPhase::Disconnected;
            outbox.queue.clear();
        }
        self.wake.notify_one();
    }

    fn info(&self) -> SubscriberInfo {
        let outbox = lock(&self.outbox);
        SubscriberInfo {
            id: self.id,
            phase: outbox.phase,
            last_sent_version: outbox.last_sent,
            queued: outbox.queue.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Registry of live subscribers, fed by the state store.
///
/// Register it with [`StateStore::add_observer`](crate::store::StateStore::add_observer)
/// so every committed version reaches [`SubscriptionHub::on_state_change`].
#[derive(Debug)]
pub struct SubscriptionHub {
    subscribers: Mutex<HashMap<SubscriberId, Arc<Subscriber>>>,
    latest: Mutex<Arc<StateBroadcast>>,
    queue_capacity: usize,
}

impl SubscriptionHub {
    /// Create a hub seeded with the current state.
    ///
    /// `queue_capacity` is the per-subscriber backlog that triggers
    /// collapsing; it is clamped to at least 1.
    pub fn new(current: &AggregateState, queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            latest: Mutex::new(Arc::new(current.to_broadcast())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a transport and queue the current full snapshot for it.
    ///
    /// Spawns the subscriber's writer task, so it must be called from within
    /// a Tokio runtime.
    pub fn subscribe(self: &Arc<Self>, transport: Box<dyn Transport>) -> SubscriberId {
        let id = SubscriberId::new();
        let subscriber = Arc::new(Subscriber::new(id));

        // Register before reading `latest` so no version falls in between;
        // the outbox drops anything not newer than what it already holds.
        lock(&self.subscribers).insert(id, Arc::clone(&subscriber));
        let latest = Arc::clone(&*lock(&self.latest));
        subscriber.enqueue(&latest, self.queue_capacity);

        tokio::spawn(run_writer(Arc::downgrade(self), subscriber, transport));

        info!(subscriber_id = %id, version = latest.version, "subscriber connected");
        id
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let Some(subscriber) = lock(&self.subscribers).remove(&id) else {
            return false;
        };
        subscriber.disconnect();
        info!(subscriber_id = %id, "subscriber removed");
        true
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Snapshot of every registered subscriber.
    pub fn phases(&self) -> Vec<SubscriberInfo> {
        let subscribers: Vec<Arc<Subscriber>> = lock(&self.subscribers).values().cloned().collect();
        subscribers.iter().map(|s| s.info()).collect()
    }

    /// Phase of one subscriber, if registered.
    pub fn phase(&self, id: SubscriberId) -> Option<SubscriberPhase> {
        let subscriber = lock(&self.subscribers).get(&id).cloned()?;
        Some(subscriber.info().phase)
    }

    /// The most recent broadcast message.
    pub fn latest(&self) -> Arc<StateBroadcast> {
        Arc::clone(&*lock(&self.latest))
    }

    /// Disconnect every subscriber.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Subscriber>> = lock(&self.subscribers).drain().map(|(_, s)| s).collect();
        for subscriber in &drained {
            subscriber.disconnect();
        }
        drained.len()
    }
}

impl StateObserver for SubscriptionHub {
    fn on_state_change(&self, state: &AggregateState) {
        let message = Arc::new(state.to_broadcast());
        {
            let mut latest = lock(&self.latest);
            if message.version > latest.version {
                *latest = Arc::clone(&message);
            }
        }

        // Iterate a snapshot so concurrent unsubscribes are harmless.
        let subscribers: Vec<Arc<Subscriber>> = lock(&self.subscribers).values().cloned().collect();
        for subscriber in subscribers {
            subscriber.enqueue(&message, self.queue_capacity);
        }
    }
}

/// Drain one subscriber's outbox into its transport until either side ends.
async fn run_writer(hub: Weak<SubscriptionHub>, subscriber: Arc<Subscriber>, transport: Box<dyn Transport>) {
    loop {
        match subscriber.next() {
            Next::Send(message) => match transport.send(&message).await {
                Ok(()) => subscriber.mark_sent(message.version),
                Err(err) => {
                    warn!(
                        subscriber_id = %subscriber.id,
                        version = message.version,
                        error = %err,
                        "transport write failed"
                    );
                    break;
                }
            },
            Next::Idle => {
                tokio::select! {
                    () = subscriber.wake.notified() => {}
                    () = transport.closed() => {
                        debug!(subscriber_id = %subscriber.id, "transport closed");
                        break;
                    }
                }
            }
            Next::Stop => return,
        }
    }

    subscriber.disconnect();
    if let Some(hub) = hub.upgrade() {
        hub.unsubscribe(subscriber.id);
    }
}
