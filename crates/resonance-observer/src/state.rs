//! Shared application state for the HTTP server.
//!
//! [`AppState`] bundles the core components. It is built once at startup,
//! wrapped in [`Arc`], and injected into handlers via Axum's `State`
//! extractor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use resonance_core::config::{ConfigError, FieldConfig};
use resonance_core::hub::SubscriptionHub;
use resonance_core::processor::{ContributionProcessor, ProcessorPolicy};
use resonance_core::store::{StateObserver, StateStore, StoreError};
use resonance_core::thresholds::ThresholdMonitor;
use resonance_types::AggregateState;

/// Buffer between the hub's writer task and a streaming connection.
///
/// Kept small so a slow client backs up into the hub, where pending
/// snapshots are collapsed.
pub const STREAM_BUFFER: usize = 4;

/// Errors assembling the component graph.
#[derive(Debug, thiserror::Error)]
pub enum WiringError {
    /// The configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The store could not be built.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Shared state for the Axum application.
#[derive(Clone)]
pub struct AppState {
    /// Canonical aggregate state.
    pub store: Arc<StateStore>,
    /// Producer entrypoint.
    pub processor: Arc<ContributionProcessor>,
    /// Streaming subscriber fan-out.
    pub hub: Arc<SubscriptionHub>,
    /// Threshold crossing log.
    pub monitor: Arc<ThresholdMonitor>,
    /// When the server state was assembled.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build the store, processor, hub, and monitor from configuration.
    ///
    /// When `restored` is given the store resumes from it; otherwise every
    /// channel starts at its declared initial value. The hub and monitor
    /// are registered as store observers before this returns.
    pub async fn from_config(
        config: &FieldConfig,
        restored: Option<&AggregateState>,
    ) -> Result<Self, WiringError> {
        let specs = config.channels.clone();
        let history_max = config.history.max_entries;
        let store = Arc::new(match restored {
            Some(snapshot) => StateStore::restore(specs, history_max, snapshot)?,
            None => StateStore::new(specs, history_max)?,
        });

        let current = store.snapshot().await;
        let hub = Arc::new(SubscriptionHub::new(&current, config.hub.queue_capacity));
        let monitor = Arc::new(ThresholdMonitor::new(
            config.thresholds.clone(),
            &current,
            config.hub.transition_log,
        ));
        store.add_observer(Arc::clone(&hub) as Arc<dyn StateObserver>).await;
        store.add_observer(Arc::clone(&monitor) as Arc<dyn StateObserver>).await;

        let policy = ProcessorPolicy::from_config(config)?;
        let processor = Arc::new(ContributionProcessor::new(Arc::clone(&store), policy));

        Ok(Self {
            store,
            processor,
            hub,
            monitor,
            started_at: Utc::now(),
        })
    }
}
