//! Snapshot persistence.
//!
//! The store itself knows nothing about storage. A [`SnapshotStore`] loads
//! the state to restore at startup and receives periodic checkpoints from
//! [`spawn_checkpointer`].

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use resonance_types::AggregateState;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::store::StateStore;

/// Errors reading or writing snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Filesystem failure.
    #[error("snapshot I/O error: {source}")]
    Io {
        /// The underlying error.
        #[from]
        source: std::io::Error,
    },

    /// The snapshot could not be encoded or decoded.
    #[error("snapshot JSON error: {source}")]
    Json {
        /// The underlying error.
        #[from]
        source: serde_json::Error,
    },
}

/// Load/save boundary for aggregate state snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Load the most recent snapshot, or `None` if there is none yet.
    fn load_snapshot(&self) -> BoxFuture<'_, Result<Option<AggregateState>, SnapshotError>>;

    /// Persist `state`, replacing any previous snapshot.
    fn save_snapshot<'a>(&'a self, state: &'a AggregateState) -> BoxFuture<'a, Result<(), SnapshotError>>;
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// Stores the snapshot as one pretty-printed JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    /// Store snapshots at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileSnapshotStore {
    fn load_snapshot(&self) -> BoxFuture<'_, Result<Option<AggregateState>, SnapshotError>> {
        Box::pin(async move {
            let bytes = match tokio::fs::read(&self.path).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err.into()),
            };
            let state = serde_json::from_slice(&bytes)?;
            Ok(Some(state))
        })
    }

    fn save_snapshot<'a>(&'a self, state: &'a AggregateState) -> BoxFuture<'a, Result<(), SnapshotError>> {
        Box::pin(async move {
            let json = serde_json::to_vec_pretty(state)?;
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let temp = self.temp_path();
            tokio::fs::write(&temp, json).await?;
            tokio::fs::rename(&temp, &self.path).await?;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

/// Keeps the last snapshot in memory. Useful for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<AggregateState>>,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored snapshot, if any.
    pub fn current(&self) -> Option<AggregateState> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load_snapshot(&self) -> BoxFuture<'_, Result<Option<AggregateState>, SnapshotError>> {
        let current = self.current();
        Box::pin(async move { Ok(current) })
    }

    fn save_snapshot<'a>(&'a self, state: &'a AggregateState) -> BoxFuture<'a, Result<(), SnapshotError>> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Box::pin(async { Ok(()) })
    }
}

// ---------------------------------------------------------------------------
// Checkpointing
// ---------------------------------------------------------------------------

/// Save the store's current state unless its version equals `last_saved`.
///
/// Returns the saved version, or `None` when nothing changed.
pub async fn checkpoint(
    store: &StateStore,
    snapshots: &dyn SnapshotStore,
    last_saved: Option<u64>,
) -> Result<Option<u64>, SnapshotError> {
    let state = store.snapshot().await;
    if last_saved == Some(state.version) {
        debug!(version = state.version, "checkpoint skipped, state unchanged");
        return Ok(None);
    }
    snapshots.save_snapshot(&state).await?;
    debug!(version = state.version, "checkpoint written");
    Ok(Some(state.version))
}

/// Spawn the periodic checkpoint task.
///
/// Failures are logged and retried on the next tick.
pub fn spawn_checkpointer(
    store: Arc<StateStore>,
    snapshots: Arc<dyn SnapshotStore>,
    period: Duration,
) -> JoinHandle<()> {
    info!(interval_ms = period.as_millis(), "checkpointer started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        let mut last_saved = None;
        loop {
            ticker.tick().await;
            match checkpoint(&store, snapshots.as_ref(), last_saved).await {
                Ok(Some(version)) => last_saved = Some(version),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "checkpoint failed"),
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use resonance_types::ChannelSpec;

    use super::*;

    fn temp_file() -> PathBuf {
        std::env::temp_dir()
            .join(format!("resonance-{}", uuid::Uuid::now_v7()))
            .join("snapshot.json")
    }

    fn store() -> Arc<StateStore> {
        let specs = vec![ChannelSpec::new("coherence", 0.0, 100.0, 72.0)];
        Arc::new(StateStore::new(specs, 10).unwrap())
    }

    #[tokio::test]
    async fn json_file_round_trips() {
        let path = temp_file();
        let snapshots = JsonFileSnapshotStore::new(&path);
        assert!(snapshots.load_snapshot().await.unwrap().is_none());

        let store = store();
        store.mutate("coherence", 3.0).await.unwrap();
        let state = store.snapshot().await;
        snapshots.save_snapshot(&state).await.unwrap();

        let loaded = snapshots.load_snapshot().await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!snapshots.temp_path().exists());

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn corrupt_file_is_a_json_error() {
        let path = temp_file();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        let err = JsonFileSnapshotStore::new(&path).load_snapshot().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Json { .. }));

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn checkpoint_skips_unchanged_state() {
        let store = store();
        let snapshots = MemorySnapshotStore::new();

        let first = checkpoint(&store, &snapshots, None).await.unwrap();
        assert_eq!(first, Some(0));
        assert_eq!(checkpoint(&store, &snapshots, first).await.unwrap(), None);

        store.mutate("coherence", 1.0).await.unwrap();
        assert_eq!(checkpoint(&store, &snapshots, first).await.unwrap(), Some(1));
        assert_eq!(snapshots.current().unwrap().version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn checkpointer_saves_on_interval() {
        let store = store();
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let handle = spawn_checkpointer(
            Arc::clone(&store),
            Arc::clone(&snapshots) as Arc<dyn SnapshotStore>,
            Duration::from_secs(30),
        );

        store.mutate("coherence", 2.0).await.unwrap();
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(snapshots.current().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(snapshots.current().unwrap().version, 1);
        handle.abort();
    }
}
