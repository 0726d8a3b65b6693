//! Engine binary for the Resonance field aggregator.
//!
//! Wires the state store, contribution processor, subscription hub, and
//! threshold monitor together, starts the background tasks and the HTTP
//! server, and shuts everything down cleanly on `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `resonance-config.yaml` (or `RESONANCE_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Restore the last snapshot, if persistence is configured
//! 4. Build and wire the core components
//! 5. Start the decay ticker and checkpointer
//! 6. Start the HTTP server
//! 7. Wait for `Ctrl-C`
//!
//! # Shutdown Sequence
//!
//! Background tasks stop and the server stops accepting connections.
//! Streaming subscribers are disconnected and the server drains. Open
//! coalescing windows are flushed after that, then a final checkpoint is
//! written.

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use resonance_core::config::{FieldConfig, LogFormat, LoggingConfig};
use resonance_core::persistence::{self, JsonFileSnapshotStore, SnapshotStore};
use resonance_observer::server::ServerConfig;
use resonance_observer::startup::{spawn_observer, stop_observer};
use resonance_observer::state::AppState;
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Config file used when `RESONANCE_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "resonance-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any startup step fails or the final checkpoint
/// cannot be written.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration. Logging depends on it, so this comes first.
    let (config, config_source) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("resonance-engine starting");
    info!(
        source = %config_source,
        channels = config.channels.len(),
        cooldown_ms = config.rate_limit.cooldown_ms,
        decay_enabled = config.decay.enabled,
        decay_interval_ms = config.decay.interval_ms,
        queue_capacity = config.hub.queue_capacity,
        history_max = config.history.max_entries,
        "Configuration loaded"
    );

    // 3. Restore the last snapshot.
    let snapshots: Option<Arc<dyn SnapshotStore>> = config
        .persistence
        .snapshot_path
        .as_ref()
        .map(|path| Arc::new(JsonFileSnapshotStore::new(path)) as Arc<dyn SnapshotStore>);
    let restored = match &snapshots {
        Some(store) => store.load_snapshot().await?,
        None => None,
    };
    match &restored {
        Some(state) => info!(version = state.version, "Snapshot loaded"),
        None => info!("No snapshot, starting from initial values"),
    }

    // 4. Build and wire the core components.
    let app_state = Arc::new(AppState::from_config(&config, restored.as_ref()).await?);
    let initial = app_state.store.snapshot().await;
    info!(
        version = initial.version,
        thresholds = app_state.monitor.thresholds().len(),
        "State store ready"
    );

    // 5. Background tasks.
    let decay_handle = app_state.processor.spawn_decay();
    let checkpoint_handle = snapshots.as_ref().map(|store| {
        persistence::spawn_checkpointer(
            Arc::clone(&app_state.store),
            Arc::clone(store),
            config.persistence.checkpoint_interval(),
        )
    });

    // 6. HTTP server.
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server_config = ServerConfig::from(&config.server);
    let server_handle = spawn_observer(&server_config, Arc::clone(&app_state), async move {
        let _ = shutdown_rx.await;
    })
    .await?;

    // 7. Run until interrupted.
    tokio::signal::ctrl_c()
        .await
        .map_err(|source| EngineError::Signal { source })?;
    info!("Shutdown requested");

    if let Some(handle) = decay_handle {
        handle.abort();
    }
    if let Some(handle) = checkpoint_handle {
        handle.abort();
    }

    stop_observer(&app_state, shutdown_tx, server_handle).await;

    let final_state = app_state.store.snapshot().await;
    if let Some(store) = &snapshots {
        persistence::checkpoint(&app_state.store, store.as_ref(), None).await?;
        info!(version = final_state.version, "Final checkpoint written");
    }

    info!(
        final_version = final_state.version,
        history_len = app_state.store.history_len().await,
        "resonance-engine shutdown complete"
    );

    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    match logging.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

/// Load configuration from `RESONANCE_CONFIG` or `resonance-config.yaml`.
///
/// A missing file means built-in defaults; environment overrides apply
/// either way. Returns the config and a description of where it came from.
fn load_config() -> Result<(FieldConfig, String), EngineError> {
    let config_path = std::env::var("RESONANCE_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if config_path.exists() {
        let config = FieldConfig::from_file(&config_path)?;
        Ok((config, config_path.display().to_string()))
    } else {
        Ok((FieldConfig::from_env()?, String::from("defaults")))
    }
}
