//! REST endpoint handlers.
//!
//! Reads are served from store snapshots and never hold the mutation lock
//! beyond a copy. The only write path is `POST /api/contributions`, which
//! goes through the contribution processor like any other producer.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/health` | Liveness probe |
//! | `GET` | `/api/state` | Current state in broadcast wire format |
//! | `GET` | `/api/history` | Mutation history (`?since=N&limit=M`) |
//! | `GET` | `/api/analytics/{channel}` | Per-channel statistics |
//! | `GET` | `/api/transitions` | Recent threshold crossings |
//! | `GET` | `/api/subscribers` | Streaming subscriber status |
//! | `POST` | `/api/contributions` | Submit a contribution |

use std::fmt::Write as _;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use chrono::Utc;
use resonance_core::analytics::{ChannelAnalytics, DEFAULT_TOP_SOURCES};
use resonance_core::processor::ApplyOutcome;
use resonance_types::{KIND_SCHEMA_VERSION, RawContribution};

use crate::error::ObserverError;
use crate::state::AppState;

/// Default page size for `GET /api/history`.
const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Upper bound on `limit` for `GET /api/history`.
const MAX_HISTORY_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

/// Query parameters for `GET /api/history`.
#[derive(Debug, serde::Deserialize)]
pub struct HistoryQuery {
    /// Return entries with a version strictly greater than this.
    pub since: Option<u64>,
    /// Maximum number of entries (default 100, max 1000).
    pub limit: Option<usize>,
}

/// Query parameters for `GET /api/analytics/{channel}`.
#[derive(Debug, serde::Deserialize)]
pub struct AnalyticsQuery {
    /// Number of top sources to include (default 5).
    pub top: Option<usize>,
}

/// Query parameters for `GET /api/transitions`.
#[derive(Debug, serde::Deserialize)]
pub struct TransitionsQuery {
    /// Only transitions on this channel.
    pub channel: Option<String>,
}

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page showing the current channel values and API links.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.store.snapshot().await;
    let version = snapshot.version;
    let subscribers = state.hub.subscriber_count();
    let uptime = Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();

    let mut metrics = String::new();
    for (channel, value) in &snapshot.channels {
        let _ = write!(
            metrics,
            r#"
        <div class="metric">
            <div class="label">{channel}</div>
            <div class="value">{value:.2}</div>
        </div>"#
        );
    }

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Resonance Field</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Cascadia Code', 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 800px;
            margin: 0 auto;
        }}
        h1 {{ color: #58a6ff; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8b949e; margin-top: 0; }}
        .metric {{
            display: inline-block;
            background: #161b22;
            border: 1px solid #30363d;
            border-radius: 6px;
            padding: 1rem 1.5rem;
            margin: 0.5rem 0.5rem 0.5rem 0;
            min-width: 120px;
        }}
        .metric .label {{ color: #8b949e; font-size: 0.85rem; }}
        .metric .value {{ color: #58a6ff; font-size: 1.5rem; font-weight: bold; }}
        a {{ color: #58a6ff; text-decoration: none; }}
        a:hover {{ text-decoration: underline; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ padding: 0.3rem 0; }}
        .status {{ color: #3fb950; font-weight: bold; }}
        hr {{ border: none; border-top: 1px solid #30363d; margin: 1.5rem 0; }}
    </style>
</head>
<body>
    <h1>Resonance Field</h1>
    <p class="subtitle">Shared aggregate state -- version {version}, {subscribers} live subscribers, up {uptime}s</p>

    <p>Status: <span class="status">RUNNING</span></p>

    <div>{metrics}
    </div>

    <hr>

    <h2>API Endpoints</h2>
    <ul>
        <li>GET <a href="/api/state">/api/state</a> -- Current state</li>
        <li>GET <a href="/api/history">/api/history</a> -- Mutation history (?since=N&amp;limit=M)</li>
        <li>GET /api/analytics/{{channel}} -- Channel statistics</li>
        <li>GET <a href="/api/transitions">/api/transitions</a> -- Threshold crossings</li>
        <li>GET <a href="/api/subscribers">/api/subscribers</a> -- Subscriber status</li>
        <li>POST /api/contributions -- Submit a contribution</li>
    </ul>

    <h2>Streams</h2>
    <ul>
        <li><code>ws://host:port/ws/state</code> -- WebSocket state stream</li>
        <li><code>http://host:port/sse/state</code> -- Server-Sent Events state stream</li>
    </ul>
</body>
</html>"#
    ))
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Liveness probe with the current version and subscriber count.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let version = state.store.snapshot().await.version;
    Json(serde_json::json!({
        "status": "ok",
        "version": version,
        "broadcast_version": state.hub.latest().version,
        "kind_schema_version": KIND_SCHEMA_VERSION,
        "subscribers": state.hub.subscriber_count(),
        "pending_windows": state.processor.pending_windows().await,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/state
// ---------------------------------------------------------------------------

/// Return the current state in the same shape as streamed broadcasts.
pub async fn get_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.snapshot().await.to_broadcast())
}

// ---------------------------------------------------------------------------
// GET /api/history
// ---------------------------------------------------------------------------

/// Return retained mutation history, oldest first, for catch-up.
///
/// # Query Parameters
///
/// - `since`: Only entries newer than this version (default 0).
/// - `limit`: Maximum number of entries (default 100, max 1000).
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if limit == 0 {
        return Err(ObserverError::InvalidQuery(String::from("limit must be positive")));
    }
    let limit = limit.min(MAX_HISTORY_LIMIT);

    let mut entries = state.store.history_since(params.since.unwrap_or(0)).await;
    let available = entries.len();
    entries.truncate(limit);

    Ok(Json(serde_json::json!({
        "count": entries.len(),
        "available": available,
        "oldest_version": state.store.oldest_history_version().await,
        "capacity": state.store.history_capacity().await,
        "entries": entries,
    })))
}

// ---------------------------------------------------------------------------
// GET /api/analytics/{channel}
// ---------------------------------------------------------------------------

/// Return statistics for one channel over the retained history.
pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    if !state.store.has_channel(&channel) {
        return Err(ObserverError::NotFound(format!("channel {channel}")));
    }
    let entries = state.store.history_since(0).await;
    let top = params.top.unwrap_or(DEFAULT_TOP_SOURCES);
    let analytics = ChannelAnalytics::compute(&channel, &entries, top);
    let current = state.store.snapshot().await.get(&channel);

    Ok(Json(serde_json::json!({
        "current": current,
        "analytics": serde_json::to_value(&analytics)?,
    })))
}

// ---------------------------------------------------------------------------
// GET /api/transitions
// ---------------------------------------------------------------------------

/// Return recent threshold crossings, oldest first.
pub async fn list_transitions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransitionsQuery>,
) -> impl IntoResponse {
    let transitions = match params.channel.as_deref() {
        Some(channel) => state.monitor.recent_for(channel),
        None => state.monitor.recent(),
    };
    Json(serde_json::json!({
        "count": transitions.len(),
        "transitions": transitions,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/subscribers
// ---------------------------------------------------------------------------

/// Return the phase and progress of every streaming subscriber.
pub async fn list_subscribers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let subscribers = state.hub.phases();
    Json(serde_json::json!({
        "count": subscribers.len(),
        "subscribers": subscribers,
    }))
}

// ---------------------------------------------------------------------------
// POST /api/contributions
// ---------------------------------------------------------------------------

/// Hand a producer contribution to the processor.
///
/// Responds `200` when applied, `202` when buffered in a coalescing window,
/// and `422` when dropped. The body is the outcome in every case.
pub async fn post_contribution(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<RawContribution>,
) -> impl IntoResponse {
    let outcome = state.processor.apply_raw(raw).await;
    let status = match &outcome {
        ApplyOutcome::Applied { .. } => StatusCode::OK,
        ApplyOutcome::Buffered { .. } => StatusCode::ACCEPTED,
        ApplyOutcome::Dropped { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(outcome))
}
