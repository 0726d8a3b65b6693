//! The canonical aggregate state and its single-writer mutation path.
//!
//! [`StateStore`] owns the only mutable copy of the [`AggregateState`].
//! Every mutation goes through one async mutex, so concurrent producers,
//! the decay ticker, and restore never race. Callers only ever receive
//! cloned snapshots.
//!
//! After each mutation the store notifies its registered
//! [`StateObserver`]s synchronously, while still inside the serialized
//! section. Observers therefore see every version exactly once and in
//! order, and must never block.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use resonance_types::{AggregateState, ChannelSpec, HistoryEntry, MutationCause};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::history::HistoryBuffer;

/// Values closer than this to a decay baseline count as settled.
const SETTLE_EPSILON: f64 = 1e-9;

/// Errors that can occur on the mutation path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The channel name is not declared.
    #[error("unknown channel `{channel}`")]
    UnknownChannel {
        /// The offending name.
        channel: String,
    },

    /// The delta was NaN or infinite.
    #[error("non-finite delta {delta} for channel `{channel}`")]
    NonFiniteDelta {
        /// Target channel.
        channel: String,
        /// The offending delta.
        delta: f64,
    },

    /// The version counter would overflow.
    #[error("state version overflow: cannot advance beyond u64::MAX")]
    VersionOverflow,

    /// The channel declarations are unusable.
    #[error("invalid channel declaration: {reason}")]
    InvalidSpec {
        /// What is wrong.
        reason: String,
    },
}

/// Receives every new state, in version order.
///
/// Called with the store's mutation lock held. Implementations must return
/// promptly and must not call back into the store.
pub trait StateObserver: Send + Sync {
    /// Called once per mutation with the new snapshot.
    fn on_state_change(&self, state: &AggregateState);
}

struct StoreInner {
    state: AggregateState,
    history: HistoryBuffer,
    observers: Vec<Arc<dyn StateObserver>>,
}

/// Holder of the canonical [`AggregateState`].
pub struct StateStore {
    specs: BTreeMap<String, ChannelSpec>,
    inner: Mutex<StoreInner>,
}

impl StateStore {
    /// Create a store at version 0 with every channel at its initial value.
    pub fn new(specs: Vec<ChannelSpec>, history_max: usize) -> Result<Self, StoreError> {
        let state = AggregateState::initial(&specs);
        Self::build(specs, history_max, state)
    }

    /// Create a store seeded from a previously saved snapshot.
    ///
    /// Values are clamped into the declared ranges, channels missing from
    /// the snapshot start at their initial value, and channels no longer
    /// declared are dropped. The snapshot's version is kept so subscribers
    /// never see the version counter go backwards across restarts.
    pub fn restore(
        specs: Vec<ChannelSpec>,
        history_max: usize,
        snapshot: &AggregateState,
    ) -> Result<Self, StoreError> {
        let mut state = AggregateState::initial(&specs);
        state.version = snapshot.version;
        state.updated_at = snapshot.updated_at;

        for (name, value) in &snapshot.channels {
            match specs.iter().find(|spec| &spec.name == name) {
                Some(spec) => {
                    let clamped = spec.clamp(*value);
                    if (clamped - *value).abs() > SETTLE_EPSILON {
                        warn!(channel = %name, value, clamped, "restored value outside range, clamped");
                    }
                    state.channels.insert(name.clone(), clamped);
                }
                None => {
                    warn!(channel = %name, "snapshot channel no longer declared, ignoring");
                }
            }
        }

        info!(version = state.version, "state restored from snapshot");
        Self::build(specs, history_max, state)
    }

    fn build(
        specs: Vec<ChannelSpec>,
        history_max: usize,
        state: AggregateState,
    ) -> Result<Self, StoreError> {
        if specs.is_empty() {
            return Err(StoreError::InvalidSpec {
                reason: "at least one channel is required".to_owned(),
            });
        }

        let mut by_name = BTreeMap::new();
        for spec in specs {
            if spec.min.is_nan() || spec.max.is_nan() || spec.min >= spec.max {
                return Err(StoreError::InvalidSpec {
                    reason: format!("channel `{}` has an empty range", spec.name),
                });
            }
            let name = spec.name.clone();
            if by_name.insert(name.clone(), spec).is_some() {
                return Err(StoreError::InvalidSpec {
                    reason: format!("duplicate channel `{name}`"),
                });
            }
        }

        Ok(Self {
            specs: by_name,
            inner: Mutex::new(StoreInner {
                state,
                history: HistoryBuffer::new(history_max),
                observers: Vec::new(),
            }),
        })
    }

    /// Register an observer for all subsequent mutations.
    pub async fn add_observer(&self, observer: Arc<dyn StateObserver>) {
        self.inner.lock().await.observers.push(observer);
    }

    /// An owned copy of the current state.
    pub async fn snapshot(&self) -> AggregateState {
        self.inner.lock().await.state.clone()
    }

    /// Declared channels, ordered by name.
    pub fn channel_specs(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.specs.values()
    }

    /// Whether `channel` is declared.
    pub fn has_channel(&self, channel: &str) -> bool {
        self.specs.contains_key(channel)
    }

    /// Add `delta` to `channel`, clamped to its range.
    pub async fn mutate(&self, channel: &str, delta: f64) -> Result<AggregateState, StoreError> {
        self.mutate_with_cause(channel, delta, MutationCause::Direct)
            .await
    }

    /// Add `delta` to `channel` and record `cause` in the history.
    ///
    /// Unknown channels are rejected; channels are never created on the fly.
    pub async fn mutate_with_cause(
        &self,
        channel: &str,
        delta: f64,
        cause: MutationCause,
    ) -> Result<AggregateState, StoreError> {
        let spec = self.require(channel)?;
        if !delta.is_finite() {
            return Err(StoreError::NonFiniteDelta {
                channel: channel.to_owned(),
                delta,
            });
        }

        let mut inner = self.inner.lock().await;
        let current = inner.state.get(channel).unwrap_or(spec.initial);
        let next = spec.clamp(current + delta);
        Self::commit(&mut inner, spec, next, cause)
    }

    /// Move `channel` toward `baseline` by at most `step`, never past it.
    ///
    /// Returns `Ok(None)` when the channel is already at its baseline. The
    /// distance is computed under the mutation lock, so a contribution
    /// landing between ticks cannot cause an overshoot.
    pub async fn settle(
        &self,
        channel: &str,
        baseline: f64,
        step: f64,
    ) -> Result<Option<AggregateState>, StoreError> {
        let spec = self.require(channel)?;
        if !baseline.is_finite() || !step.is_finite() {
            return Err(StoreError::NonFiniteDelta {
                channel: channel.to_owned(),
                delta: step,
            });
        }

        let mut inner = self.inner.lock().await;
        let current = inner.state.get(channel).unwrap_or(spec.initial);
        let gap = baseline - current;
        if gap.abs() <= SETTLE_EPSILON {
            return Ok(None);
        }
        let next = spec.clamp(current + step.abs().min(gap.abs()).copysign(gap));
        Self::commit(&mut inner, spec, next, MutationCause::Decay { baseline }).map(Some)
    }

    fn require(&self, channel: &str) -> Result<&ChannelSpec, StoreError> {
        self.specs
            .get(channel)
            .ok_or_else(|| StoreError::UnknownChannel {
                channel: channel.to_owned(),
            })
    }

    fn commit(
        inner: &mut StoreInner,
        spec: &ChannelSpec,
        value: f64,
        cause: MutationCause,
    ) -> Result<AggregateState, StoreError> {
        let version = inner
            .state
            .version
            .checked_add(1)
            .ok_or(StoreError::VersionOverflow)?;

        inner.state.channels.insert(spec.name.clone(), value);
        inner.state.version = version;
        inner.state.updated_at = Utc::now();

        let snapshot = inner.state.clone();
        inner.history.push(HistoryEntry {
            version,
            channel: spec.name.clone(),
            state: snapshot.clone(),
            cause,
        });

        debug!(channel = %spec.name, version, value, "state mutated");

        for observer in &inner.observers {
            observer.on_state_change(&snapshot);
        }

        Ok(snapshot)
    }

    /// History entries with `version > since`, oldest first.
    pub async fn history_since(&self, since: u64) -> Vec<HistoryEntry> {
        self.inner.lock().await.history.since(since)
    }

    /// Number of retained history entries.
    pub async fn history_len(&self) -> usize {
        self.inner.lock().await.history.len()
    }

    /// Oldest version still retained in the history.
    ///
    /// A reconnecting client whose last seen version is older than this has
    /// missed entries and should resync from a full snapshot.
    pub async fn oldest_history_version(&self) -> Option<u64> {
        self.inner.lock().await.history.oldest_version()
    }

    /// Configured history capacity.
    pub async fn history_capacity(&self) -> usize {
        self.inner.lock().await.history.max_entries()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn coherence_store(initial: f64) -> StateStore {
        let specs = vec![ChannelSpec::new("coherence", 0.0, 100.0, initial)];
        StateStore::new(specs, 1_000).unwrap()
    }

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<u64>>);

    impl StateObserver for Recorder {
        fn on_state_change(&self, state: &AggregateState) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(state.version);
            }
        }
    }

    #[tokio::test]
    async fn mutation_is_clamped_to_range() {
        let store = coherence_store(50.0);
        let state = store.mutate("coherence", 80.0).await;
        assert!(state.is_ok_and(|s| s.get("coherence").is_some_and(|v| close(v, 100.0))));

        let state = store.mutate("coherence", -250.0).await;
        assert!(state.is_ok_and(|s| s.get("coherence").is_some_and(|v| close(v, 0.0))));
    }

    #[tokio::test]
    async fn values_stay_in_range_for_any_sequence() {
        let store = coherence_store(50.0);
        let deltas = [13.7, -99.0, 250.0, -0.5, 42.0, -1e6, 1e6, 3.3, -3.3, 77.7];
        for delta in deltas.iter().cycle().take(200) {
            let state = store.mutate("coherence", *delta).await;
            let value = state.ok().and_then(|s| s.get("coherence"));
            assert!(value.is_some_and(|v| (0.0..=100.0).contains(&v)));
        }
    }

    #[tokio::test]
    async fn unknown_channel_is_rejected_without_mutation() {
        let store = coherence_store(50.0);
        let err = store.mutate("love", 1.0).await;
        assert_eq!(
            err,
            Err(StoreError::UnknownChannel {
                channel: "love".to_owned()
            })
        );
        let state = store.snapshot().await;
        assert_eq!(state.version, 0);
        assert!(state.get("love").is_none());
    }

    #[tokio::test]
    async fn non_finite_delta_is_rejected() {
        let store = coherence_store(50.0);
        assert!(store.mutate("coherence", f64::NAN).await.is_err());
        assert!(store.mutate("coherence", f64::INFINITY).await.is_err());
        assert_eq!(store.snapshot().await.version, 0);
    }

    #[tokio::test]
    async fn versions_increase_and_history_is_recorded() {
        let store = coherence_store(50.0);
        for _ in 0..5 {
            assert!(store.mutate("coherence", 1.0).await.is_ok());
        }
        assert_eq!(store.snapshot().await.version, 5);
        let versions: Vec<u64> = store
            .history_since(2)
            .await
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let specs = vec![ChannelSpec::new("coherence", 0.0, 100.0, 50.0)];
        let store = StateStore::new(specs, 16).unwrap();
        for _ in 0..100 {
            assert!(store.mutate("coherence", 0.1).await.is_ok());
        }
        assert_eq!(store.history_len().await, 16);
    }

    #[tokio::test]
    async fn snapshot_is_a_copy() {
        let store = coherence_store(50.0);
        let mut copy = store.snapshot().await;
        copy.channels.insert("coherence".to_owned(), 99.0);
        copy.version = 42;
        let fresh = store.snapshot().await;
        assert_eq!(fresh.version, 0);
        assert!(fresh.get("coherence").is_some_and(|v| close(v, 50.0)));
    }

    #[tokio::test]
    async fn observers_see_every_version_in_order() {
        let store = Arc::new(coherence_store(50.0));
        let recorder = Arc::new(Recorder::default());
        store.add_observer(recorder.clone()).await;

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let _ = store.mutate("coherence", 0.5).await;
            }));
        }
        for task in tasks {
            assert!(task.await.is_ok());
        }

        let seen = recorder.0.lock().map(|v| v.clone()).unwrap_or_default();
        assert_eq!(seen, (1..=20).collect::<Vec<u64>>());
        let value = store.snapshot().await.get("coherence");
        assert!(value.is_some_and(|v| close(v, 60.0)));
    }

    #[tokio::test]
    async fn settle_moves_toward_baseline_without_overshoot() {
        let store = coherence_store(80.0);
        let state = store.settle("coherence", 50.0, 1.0).await;
        assert!(state.is_ok_and(|s| s.is_some_and(|s| s.get("coherence").is_some_and(|v| close(v, 79.0)))));

        let store = coherence_store(50.4);
        let state = store.settle("coherence", 50.0, 1.0).await;
        assert!(state.is_ok_and(|s| s.is_some_and(|s| s.get("coherence").is_some_and(|v| close(v, 50.0)))));

        let state = store.settle("coherence", 50.0, 1.0).await;
        assert!(state.is_ok_and(|s| s.is_none()));
    }

    #[tokio::test]
    async fn settle_rises_from_below() {
        let store = coherence_store(10.0);
        let state = store.settle("coherence", 50.0, 2.5).await;
        assert!(state.is_ok_and(|s| s.is_some_and(|s| s.get("coherence").is_some_and(|v| close(v, 12.5)))));
    }

    #[tokio::test]
    async fn restore_clamps_and_keeps_version() {
        let specs = vec![
            ChannelSpec::new("coherence", 0.0, 100.0, 50.0),
            ChannelSpec::new("vitality", 0.0, 1.0, 0.5),
        ];
        let snapshot = AggregateState {
            version: 41,
            updated_at: Utc::now(),
            channels: BTreeMap::from([
                ("coherence".to_owned(), 140.0),
                ("retired".to_owned(), 3.0),
            ]),
        };
        let store = StateStore::restore(specs, 10, &snapshot).unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.version, 41);
        assert!(state.get("coherence").is_some_and(|v| close(v, 100.0)));
        assert!(state.get("vitality").is_some_and(|v| close(v, 0.5)));
        assert!(state.get("retired").is_none());
    }

    #[test]
    fn rejects_bad_declarations() {
        assert!(StateStore::new(Vec::new(), 10).is_err());
        let dup = vec![
            ChannelSpec::new("coherence", 0.0, 100.0, 50.0),
            ChannelSpec::new("coherence", 0.0, 1.0, 0.5),
        ];
        assert!(StateStore::new(dup, 10).is_err());
        let inverted = vec![ChannelSpec::new("coherence", 1.0, 0.0, 0.5)];
        assert!(StateStore::new(inverted, 10).is_err());
    }
}
