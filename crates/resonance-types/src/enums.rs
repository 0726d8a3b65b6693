//! Enumeration types shared across the workspace.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Version of the [`ContributionKind`] vocabulary.
///
/// Bump whenever a kind is added or removed so producers and weight tables
/// can detect drift.
pub const KIND_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Contribution kinds
// ---------------------------------------------------------------------------

/// The closed set of event kinds a producer may contribute.
///
/// Each kind maps to exactly one weight in the processor's weight table; the
/// table is checked for completeness when configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ContributionKind {
    /// A chat message was posted.
    Message,
    /// A practice session was completed.
    Practice,
    /// A group gathering started or ended.
    Ceremony,
    /// A device bridge reported a sensor reading.
    SensorReading,
    /// A unit of work progressed or completed.
    Work,
    /// A collective decision was reached.
    Decision,
    /// A rare high-impact event.
    Breakthrough,
}

impl ContributionKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Message,
        Self::Practice,
        Self::Ceremony,
        Self::SensorReading,
        Self::Work,
        Self::Decision,
        Self::Breakthrough,
    ];

    /// The wire name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Practice => "practice",
            Self::Ceremony => "ceremony",
            Self::SensorReading => "sensor_reading",
            Self::Work => "work",
            Self::Decision => "decision",
            Self::Breakthrough => "breakthrough",
        }
    }
}

impl core::fmt::Display for ContributionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known [`ContributionKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown contribution kind `{0}`")]
pub struct UnknownKind(pub String);

impl FromStr for ContributionKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Subscriber lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle phase of a subscriber.
///
/// `Connecting -> Active -> (Stalled -> Active | Disconnected)`.
/// `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SubscriberPhase {
    /// Registered, initial snapshot not yet delivered.
    Connecting,
    /// Keeping up with the broadcast stream.
    Active,
    /// Outbound queue overflowed; intermediate snapshots are being dropped.
    Stalled,
    /// Transport closed or failed. Terminal.
    Disconnected,
}

impl SubscriberPhase {
    /// Whether the phase is terminal.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

// ---------------------------------------------------------------------------
// Threshold crossings
// ---------------------------------------------------------------------------

/// Direction in which a channel value crossed a threshold level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum CrossingDirection {
    /// Moved from below the level to at-or-above it.
    Rising,
    /// Moved from at-or-above the level to below it.
    Falling,
}
