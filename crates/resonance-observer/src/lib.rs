//! HTTP surface for the Resonance field aggregator.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **REST endpoints** for the current state, history, per-channel
//!   analytics, threshold transitions, and subscriber status
//! - **Producer endpoint** (`POST /api/contributions`) feeding the
//!   contribution processor
//! - **`WebSocket` stream** (`/ws/state`) and **Server-Sent Events stream**
//!   (`/sse/state`), both thin adapters over the core
//!   [`Transport`](resonance_core::hub::Transport) boundary
//! - **Minimal HTML status page** (`GET /`)
//!
//! # Architecture
//!
//! Handlers never touch state directly. Reads go through
//! [`StateStore`](resonance_core::store::StateStore) snapshots, writes go
//! through the [`ContributionProcessor`](resonance_core::processor::ContributionProcessor),
//! and streaming clients are registered with the
//! [`SubscriptionHub`](resonance_core::hub::SubscriptionHub), which handles
//! backpressure on their behalf.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod sse;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{ServerConfig, ServerError};
pub use state::{AppState, WiringError};
