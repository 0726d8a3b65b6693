//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode during startup and shutdown so
//! `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: resonance_core::config::ConfigError,
    },

    /// Building the store, processor, or hub failed.
    #[error("wiring error: {source}")]
    Wiring {
        /// The underlying wiring error.
        #[from]
        source: resonance_observer::WiringError,
    },

    /// Loading or saving a snapshot failed.
    #[error("snapshot error: {source}")]
    Snapshot {
        /// The underlying snapshot error.
        #[from]
        source: resonance_core::persistence::SnapshotError,
    },

    /// The HTTP server failed to start.
    #[error("observer error: {source}")]
    Observer {
        /// The underlying startup error.
        #[from]
        source: resonance_observer::startup::StartupError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
