//! Core record types: channels, aggregate state, contributions, history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ContributionKind, CrossingDirection};
use crate::ids::SourceId;

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Declaration of a named numeric channel and its valid range.
///
/// Values are clamped to `[min, max]` after every mutation. A channel with a
/// `baseline` settles toward it on each decay tick; channels without one
/// never decay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ChannelSpec {
    /// Channel name, unique within a field.
    pub name: String,
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
    /// Value at process start when no snapshot is restored.
    pub initial: f64,
    /// Resting value the decay ticker moves toward.
    #[serde(default)]
    pub baseline: Option<f64>,
}

impl ChannelSpec {
    /// Convenience constructor for a channel without a decay baseline.
    pub fn new(name: impl Into<String>, min: f64, max: f64, initial: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            initial,
            baseline: None,
        }
    }

    /// Builder-style setter for the decay baseline.
    #[must_use]
    pub const fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Clamp `value` into this channel's range.
    ///
    /// Unlike [`f64::clamp`] this never panics; a NaN input collapses to `min`.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.max(self.min).min(self.max)
    }

    /// Whether `value` lies inside the declared range.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

// ---------------------------------------------------------------------------
// Aggregate state
// ---------------------------------------------------------------------------

/// Snapshot of every channel value at one version.
///
/// Always handed out by value; nothing outside the store holds a reference
/// to the live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AggregateState {
    /// Monotonically increasing mutation counter.
    pub version: u64,
    /// Wall-clock time of the last mutation (or creation).
    pub updated_at: DateTime<Utc>,
    /// Current value per channel name.
    pub channels: BTreeMap<String, f64>,
}

impl AggregateState {
    /// Build the version-0 state from channel declarations.
    pub fn initial(specs: &[ChannelSpec]) -> Self {
        Self {
            version: 0,
            updated_at: Utc::now(),
            channels: specs
                .iter()
                .map(|spec| (spec.name.clone(), spec.clamp(spec.initial)))
                .collect(),
        }
    }

    /// Current value of `channel`, if it exists.
    pub fn get(&self, channel: &str) -> Option<f64> {
        self.channels.get(channel).copied()
    }

    /// Project this state into the broadcast wire format.
    pub fn to_broadcast(&self) -> StateBroadcast {
        StateBroadcast {
            version: self.version,
            timestamp: self.updated_at,
            state: self.channels.clone(),
        }
    }
}

/// Message pushed to every subscriber.
///
/// Serializes as
/// `{ "version": <int>, "timestamp": <RFC 3339>, "state": { "<channel>": <float> } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StateBroadcast {
    /// Version of the state this message carries.
    pub version: u64,
    /// Time the state was produced.
    pub timestamp: DateTime<Utc>,
    /// Channel values.
    pub state: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Contributions
// ---------------------------------------------------------------------------

/// A validated request from a producer to nudge one channel.
///
/// Created by a producer, consumed once by the processor, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Contribution {
    /// Who sent it.
    pub source_id: SourceId,
    /// Target channel name.
    pub channel: String,
    /// Raw (unweighted) delta.
    pub delta: f64,
    /// Event kind, selects the weight.
    pub kind: ContributionKind,
    /// When the producer observed the event.
    pub timestamp: DateTime<Utc>,
}

impl Contribution {
    /// Build a contribution stamped with the current time.
    pub fn new(
        source_id: impl Into<SourceId>,
        channel: impl Into<String>,
        delta: f64,
        kind: ContributionKind,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            channel: channel.into(),
            delta,
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Unvalidated producer input as it arrives over HTTP or a bridge.
///
/// Every field is optional and `kind` is free text so that malformed input
/// can be reported and dropped instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RawContribution {
    /// Producer identifier.
    #[serde(default)]
    pub source_id: Option<String>,
    /// Target channel name.
    #[serde(default)]
    pub channel: Option<String>,
    /// Raw delta.
    #[serde(default)]
    pub delta: Option<f64>,
    /// Kind wire name, e.g. `message`.
    #[serde(default)]
    pub kind: Option<String>,
    /// Observation time; defaults to receipt time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// What caused a state mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum MutationCause {
    /// A direct store mutation with no producer attached.
    Direct,
    /// One or more contributions from the same source, merged.
    Contribution {
        /// The (merged) contribution; `delta` is the raw sum.
        contribution: Contribution,
        /// Weighted delta actually applied.
        applied_delta: f64,
        /// How many contributions were merged into this mutation.
        coalesced: u32,
    },
    /// A decay tick settling the channel toward its baseline.
    Decay {
        /// The baseline being approached.
        baseline: f64,
    },
}

/// One entry of the bounded mutation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HistoryEntry {
    /// Version produced by this mutation.
    pub version: u64,
    /// Channel that was mutated.
    pub channel: String,
    /// Full state after the mutation.
    pub state: AggregateState,
    /// Why the mutation happened.
    pub cause: MutationCause,
}

// ---------------------------------------------------------------------------
// Threshold transitions
// ---------------------------------------------------------------------------

/// A recorded crossing of a configured threshold level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Transition {
    /// Threshold name, e.g. `breakthrough`.
    pub name: String,
    /// Channel that crossed.
    pub channel: String,
    /// Threshold level.
    pub level: f64,
    /// Crossing direction.
    pub direction: CrossingDirection,
    /// Channel value after the crossing.
    pub value: f64,
    /// State version at which the crossing was observed.
    pub version: u64,
    /// When the crossing was observed.
    pub at: DateTime<Utc>,
}
