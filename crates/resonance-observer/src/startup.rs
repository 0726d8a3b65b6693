//! Server startup helper for embedding in the engine binary.
//!
//! [`spawn_observer`] binds eagerly, so an occupied port is reported to the
//! caller, then runs the server on a background Tokio task.
//! [`stop_observer`] is its counterpart for shutdown.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::server::{self, ServerConfig, ServerError};
use crate::state::AppState;

/// Errors that can occur when spawning the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Bind `config` and serve on a background task until `shutdown` resolves.
///
/// The returned handle completes once the server has drained.
pub async fn spawn_observer<F>(
    config: &ServerConfig,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<JoinHandle<()>, StartupError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = server::bind(config).await?;

    let handle = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, state, shutdown).await {
            tracing::error!(error = %e, "HTTP server exited with error");
        }
    });

    tracing::info!(host = %config.host, port = config.port, "HTTP server spawned on background task");

    Ok(handle)
}

/// What [`stop_observer`] cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Streaming subscribers that were disconnected.
    pub disconnected: usize,
    /// Coalescing windows applied after the server drained.
    pub flushed: usize,
}

/// Stop the server spawned by [`spawn_observer`] and settle the processor.
///
/// The listener stops accepting first, then open streams are closed so the
/// graceful drain can finish. Coalescing windows are flushed only once the
/// server task has ended, so nothing buffered by a late request survives.
pub async fn stop_observer(
    state: &AppState,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
) -> ShutdownReport {
    let _ = shutdown.send(());
    let disconnected = state.hub.close_all();

    if let Err(e) = server.await {
        tracing::warn!(error = %e, "HTTP server task ended abnormally");
    }

    let flushed = state.processor.flush_all().await.len();
    tracing::info!(disconnected, flushed, "HTTP server stopped, producers flushed");

    ShutdownReport { disconnected, flushed }
}
