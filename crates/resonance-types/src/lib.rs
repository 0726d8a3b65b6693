//! Shared type definitions for the Resonance field aggregator.
//!
//! Every type that crosses a crate boundary or the wire lives here. Types
//! flow downstream to `TypeScript` via `ts-rs` for dashboard clients.
//!
//! # Modules
//!
//! - [`ids`] -- Subscriber and source identifiers
//! - [`enums`] -- Contribution kinds, subscriber phases, crossing directions
//! - [`structs`] -- Channels, aggregate state, contributions, history, wire messages

pub mod enums;
pub mod ids;
pub mod structs;

pub use enums::{ContributionKind, CrossingDirection, KIND_SCHEMA_VERSION, SubscriberPhase, UnknownKind};
pub use ids::{SourceId, SubscriberId};
pub use structs::{
    AggregateState, ChannelSpec, Contribution, HistoryEntry, MutationCause, RawContribution,
    StateBroadcast, Transition,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // Files are written to `bindings/` relative to the crate root.
        use ts_rs::TS;

        let _ = crate::ids::SubscriberId::export_all();
        let _ = crate::ids::SourceId::export_all();

        let _ = crate::enums::ContributionKind::export_all();
        let _ = crate::enums::SubscriberPhase::export_all();
        let _ = crate::enums::CrossingDirection::export_all();

        let _ = crate::structs::ChannelSpec::export_all();
        let _ = crate::structs::AggregateState::export_all();
        let _ = crate::structs::StateBroadcast::export_all();
        let _ = crate::structs::Contribution::export_all();
        let _ = crate::structs::RawContribution::export_all();
        let _ = crate::structs::MutationCause::export_all();
        let _ = crate::structs::HistoryEntry::export_all();
        let _ = crate::structs::Transition::export_all();
    }
}
