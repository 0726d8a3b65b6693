//! Core of the Resonance field aggregator.
//!
//! One [`StateStore`](store::StateStore) holds the canonical aggregate state
//! and serializes every mutation. Producers go through the
//! [`ContributionProcessor`](processor::ContributionProcessor), which applies
//! weighting, coalescing, and decay. Committed versions are pushed to
//! registered observers such as the
//! [`SubscriptionHub`](hub::SubscriptionHub) and the
//! [`ThresholdMonitor`](thresholds::ThresholdMonitor).
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration, defaults, validation
//! - [`history`] -- Bounded mutation history
//! - [`store`] -- Single-writer state store and observer hook
//! - [`processor`] -- Contribution validation, weighting, coalescing, decay
//! - [`hub`] -- Subscriber fan-out and the transport boundary
//! - [`thresholds`] -- Threshold crossing log
//! - [`analytics`] -- Per-channel statistics over history
//! - [`persistence`] -- Snapshot load/save and checkpointing

pub mod analytics;
pub mod config;
pub mod history;
pub mod hub;
pub mod persistence;
pub mod processor;
pub mod store;
pub mod thresholds;
