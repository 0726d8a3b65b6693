//! Contribution processing: validation, weighting, coalescing, and decay.
//!
//! Producers hand [`Contribution`]s (or unvalidated [`RawContribution`]s)
//! to [`ContributionProcessor::apply`]. The processor
//!
//! 1. validates the record and resolves the target channel,
//! 2. computes `delta * kind_weight * source_trust`,
//! 3. coalesces contributions from the same source to the same channel
//!    that arrive within the cooldown window, applying their sum once when
//!    the window closes,
//! 4. funnels the result through the store's single-writer path.
//!
//! Bad input never escapes as an error: every call returns an
//! [`ApplyOutcome`], and drops are logged.
//!
//! The processor also owns the decay ticker, the only mutation source that
//! is not driven by a producer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use resonance_types::{
    AggregateState, Contribution, ContributionKind, MutationCause, RawContribution, SourceId,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, FieldConfig};
use crate::store::{StateStore, StoreError};

/// Why a contribution was dropped.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ContributionError {
    /// A required field is missing or unusable.
    #[error("malformed contribution: {reason}")]
    Malformed {
        /// What is wrong.
        reason: String,
    },

    /// The kind is not in the vocabulary or has no weight.
    #[error("unknown contribution kind `{kind}`")]
    UnknownKind {
        /// The offending kind name.
        kind: String,
    },

    /// The target channel is not declared.
    #[error("unknown channel `{channel}`")]
    UnknownChannel {
        /// The offending channel name.
        channel: String,
    },

    /// The store refused the mutation for another reason.
    #[error("mutation rejected: {reason}")]
    Rejected {
        /// Store error message.
        reason: String,
    },
}

impl From<StoreError> for ContributionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownChannel { channel } => Self::UnknownChannel { channel },
            other => Self::Rejected {
                reason: other.to_string(),
            },
        }
    }
}

/// Result of handing a contribution to the processor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Applied immediately; carries the resulting state.
    Applied {
        /// State after the mutation.
        state: AggregateState,
    },
    /// Held in an open coalescing window; applied when it closes.
    Buffered {
        /// Source whose window holds it.
        source_id: SourceId,
        /// Target channel.
        channel: String,
        /// Contributions currently in the window, this one included.
        pending: u32,
    },
    /// Rejected and logged. The state was not touched.
    Dropped {
        /// Why.
        #[serde(flatten)]
        reason: ContributionError,
    },
}

impl ApplyOutcome {
    /// Whether the contribution was accepted (applied or buffered).
    pub const fn is_accepted(&self) -> bool {
        !matches!(self, Self::Dropped { .. })
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Weight per contribution kind.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    weights: BTreeMap<ContributionKind, f64>,
}

impl WeightTable {
    /// Build a table, requiring a finite weight for every kind.
    pub fn new(weights: BTreeMap<ContributionKind, f64>) -> Result<Self, ConfigError> {
        for kind in ContributionKind::ALL {
            if !weights.get(&kind).is_some_and(|w| w.is_finite()) {
                return Err(ConfigError::Invalid {
                    reason: format!("missing or non-finite weight for `{kind}`"),
                });
            }
        }
        Ok(Self { weights })
    }

    /// Weight for `kind`.
    pub fn weight(&self, kind: ContributionKind) -> Option<f64> {
        self.weights.get(&kind).copied()
    }
}

/// Everything the processor needs to turn contributions into deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorPolicy {
    /// Per-kind weights.
    pub weights: WeightTable,
    /// Per-source trust multipliers; unlisted sources get `1.0`.
    pub trust: BTreeMap<SourceId, f64>,
    /// Coalescing window. Zero applies every contribution immediately.
    pub cooldown: Duration,
    /// Decay ticker period. `None` disables decay.
    pub decay_interval: Option<Duration>,
    /// Maximum distance moved toward a baseline per tick.
    pub decay_step: f64,
}

impl ProcessorPolicy {
    /// Derive the policy from validated configuration.
    pub fn from_config(config: &FieldConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            weights: WeightTable::new(config.weights.clone())?,
            trust: config
                .trust
                .iter()
                .map(|(source, trust)| (SourceId::new(source.clone()), *trust))
                .collect(),
            cooldown: config.rate_limit.cooldown(),
            decay_interval: config.decay.enabled.then(|| config.decay.interval()),
            decay_step: config.decay.step,
        })
    }

    fn trust(&self, source: &SourceId) -> f64 {
        self.trust.get(source).copied().unwrap_or(1.0)
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

type WindowKey = (SourceId, String);

/// Contributions merged within one cooldown window.
#[derive(Debug, Clone)]
struct Window {
    merged: Contribution,
    applied_delta: f64,
    count: u32,
    /// Identifies this window to its own timer. A timer never closes a
    /// later window opened under the same key.
    generation: u64,
}

impl Window {
    const fn open(contribution: Contribution, applied_delta: f64, generation: u64) -> Self {
        Self {
            merged: contribution,
            applied_delta,
            count: 1,
            generation,
        }
    }

    fn absorb(&mut self, contribution: &Contribution, applied_delta: f64) {
        self.merged.delta += contribution.delta;
        self.merged.timestamp = self.merged.timestamp.max(contribution.timestamp);
        self.applied_delta += applied_delta;
        self.count = self.count.saturating_add(1);
    }
}

/// Translates contributions into bounded store mutations.
pub struct ContributionProcessor {
    store: Arc<StateStore>,
    policy: ProcessorPolicy,
    windows: Mutex<HashMap<WindowKey, Window>>,
    next_generation: AtomicU64,
}

impl ContributionProcessor {
    /// Create a processor writing to `store`.
    pub fn new(store: Arc<StateStore>, policy: ProcessorPolicy) -> Self {
        Self {
            store,
            policy,
            windows: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// The store this processor writes to.
    pub const fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Validate, convert, and apply unvalidated producer input.
    ///
    /// Missing fields become [`ContributionError::Malformed`] and
    /// unrecognized kinds become [`ContributionError::UnknownKind`]; both
    /// are logged and dropped.
    pub async fn apply_raw(self: &Arc<Self>, raw: RawContribution) -> ApplyOutcome {
        match contribution_from_raw(raw) {
            Ok(contribution) => self.apply(contribution).await,
            Err(reason) => drop_with_log(reason),
        }
    }

    /// Apply one contribution.
    ///
    /// With a zero cooldown the weighted delta is applied immediately.
    /// Otherwise the first contribution for a `(source, channel)` pair opens
    /// a window, later ones in the window are summed into it, and the sum
    /// is applied once when the window closes.
    ///
    /// Must be called from within a Tokio runtime (window flushes are
    /// spawned tasks).
    pub async fn apply(self: &Arc<Self>, contribution: Contribution) -> ApplyOutcome {
        if let Err(reason) = self.validate(&contribution) {
            return drop_with_log(reason);
        }

        let Some(weight) = self.policy.weights.weight(contribution.kind) else {
            return drop_with_log(ContributionError::UnknownKind {
                kind: contribution.kind.to_string(),
            });
        };
        let applied_delta = contribution.delta * weight * self.policy.trust(&contribution.source_id);

        if self.policy.cooldown.is_zero() {
            return self.commit(Window::open(contribution, applied_delta, 0)).await;
        }

        let key: WindowKey = (contribution.source_id.clone(), contribution.channel.clone());
        let mut windows = self.windows.lock().await;
        if let Some(window) = windows.get_mut(&key) {
            window.absorb(&contribution, applied_delta);
            debug!(
                source_id = %key.0,
                channel = %key.1,
                pending = window.count,
                "contribution coalesced"
            );
            return ApplyOutcome::Buffered {
                source_id: key.0,
                channel: key.1,
                pending: window.count,
            };
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        windows.insert(key.clone(), Window::open(contribution, applied_delta, generation));
        drop(windows);

        let this = Arc::clone(self);
        let cooldown = self.policy.cooldown;
        let flush_key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            this.flush_window(&flush_key, generation).await;
        });

        ApplyOutcome::Buffered {
            source_id: key.0,
            channel: key.1,
            pending: 1,
        }
    }

    fn validate(&self, contribution: &Contribution) -> Result<(), ContributionError> {
        if contribution.source_id.is_blank() {
            return Err(ContributionError::Malformed {
                reason: "source_id is empty".to_owned(),
            });
        }
        if contribution.channel.trim().is_empty() {
            return Err(ContributionError::Malformed {
                reason: "channel is empty".to_owned(),
            });
        }
        if !contribution.delta.is_finite() {
            return Err(ContributionError::Malformed {
                reason: format!("delta {} is not finite", contribution.delta),
            });
        }
        if !self.store.has_channel(&contribution.channel) {
            return Err(ContributionError::UnknownChannel {
                channel: contribution.channel.clone(),
            });
        }
        Ok(())
    }

    /// Close the window under `key` if it is still the one opened as
    /// `generation`. A window already flushed by [`Self::flush_all`] and
    /// reopened is left alone.
    async fn flush_window(&self, key: &WindowKey, generation: u64) -> Option<ApplyOutcome> {
        let window = {
            let mut windows = self.windows.lock().await;
            if windows.get(key)?.generation != generation {
                return None;
            }
            windows.remove(key)?
        };
        Some(self.commit(window).await)
    }

    /// Close every open window now, applying each sum.
    ///
    /// Used on shutdown so buffered contributions are not lost.
    pub async fn flush_all(&self) -> Vec<ApplyOutcome> {
        let windows: Vec<Window> = self.windows.lock().await.drain().map(|(_, w)| w).collect();
        let mut outcomes = Vec::with_capacity(windows.len());
        for window in windows {
            outcomes.push(self.commit(window).await);
        }
        outcomes
    }

    /// Number of coalescing windows currently open.
    pub async fn pending_windows(&self) -> usize {
        self.windows.lock().await.len()
    }

    async fn commit(&self, window: Window) -> ApplyOutcome {
        let channel = window.merged.channel.clone();
        let cause = MutationCause::Contribution {
            contribution: window.merged,
            applied_delta: window.applied_delta,
            coalesced: window.count,
        };
        match self
            .store
            .mutate_with_cause(&channel, window.applied_delta, cause)
            .await
        {
            Ok(state) => ApplyOutcome::Applied { state },
            Err(err) => drop_with_log(err.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Decay
    // -----------------------------------------------------------------------

    /// Run one settling pass over every channel that declares a baseline.
    ///
    /// Returns the number of channels that moved.
    pub async fn decay_tick(&self) -> usize {
        let targets: Vec<(String, f64)> = self
            .store
            .channel_specs()
            .filter_map(|spec| spec.baseline.map(|b| (spec.name.clone(), b)))
            .collect();

        let mut moved = 0_usize;
        for (channel, baseline) in targets {
            match self
                .store
                .settle(&channel, baseline, self.policy.decay_step)
                .await
            {
                Ok(Some(state)) => {
                    moved = moved.saturating_add(1);
                    debug!(
                        channel = %channel,
                        version = state.version,
                        value = state.get(&channel),
                        baseline,
                        "channel decayed"
                    );
                }
                Ok(None) => {}
                Err(err) => warn!(channel = %channel, error = %err, "decay step failed"),
            }
        }
        moved
    }

    /// Spawn the fixed-interval decay ticker.
    ///
    /// Returns `None` when decay is disabled. The first tick fires one full
    /// interval after spawning.
    pub fn spawn_decay(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let period = self.policy.decay_interval?;
        let this = Arc::clone(self);
        info!(interval_ms = period.as_millis(), step = self.policy.decay_step, "decay ticker started");
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.decay_tick().await;
            }
        }))
    }
}

fn drop_with_log(reason: ContributionError) -> ApplyOutcome {
    warn!(reason = %reason, "contribution dropped");
    ApplyOutcome::Dropped { reason }
}

/// Convert producer input into a typed [`Contribution`].
pub fn contribution_from_raw(raw: RawContribution) -> Result<Contribution, ContributionError> {
    let missing = |field: &str| ContributionError::Malformed {
        reason: format!("missing required field `{field}`"),
    };

    let source_id = raw.source_id.ok_or_else(|| missing("source_id"))?;
    let channel = raw.channel.ok_or_else(|| missing("channel"))?;
    let delta = raw.delta.ok_or_else(|| missing("delta"))?;
    let kind_name = raw.kind.ok_or_else(|| missing("kind"))?;
    let kind = kind_name
        .parse::<ContributionKind>()
        .map_err(|unknown| ContributionError::UnknownKind { kind: unknown.0 })?;

    Ok(Contribution {
        source_id: SourceId::new(source_id),
        channel,
        delta,
        kind,
        timestamp: raw.timestamp.unwrap_or_else(Utc::now),
    })
}
