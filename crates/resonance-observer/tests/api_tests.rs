//! Integration tests for the HTTP endpoints.
//!
//! Tests drive the Axum `Router` directly via `tower::ServiceExt` without
//! starting a TCP server.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use resonance_core::config::FieldConfig;
use resonance_observer::router::build_router;
use resonance_observer::server::ServerConfig;
use resonance_observer::startup::{ShutdownReport, spawn_observer, stop_observer};
use resonance_observer::state::AppState;
use resonance_types::{AggregateState, ChannelSpec, Contribution, ContributionKind};
use serde_json::Value;
use tower::ServiceExt;

fn test_config() -> FieldConfig {
    let mut config = FieldConfig::default();
    config.rate_limit.cooldown_ms = 0;
    config.decay.enabled = false;
    config
}

async fn make_test_state() -> Arc<AppState> {
    Arc::new(AppState::from_config(&test_config(), None).await.unwrap())
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// =========================================================================
// Status
// =========================================================================

#[tokio::test]
async fn test_index_returns_html() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/html"));
}

#[tokio::test]
async fn test_health() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], 0);
}

// =========================================================================
// State and contributions
// =========================================================================

#[tokio::test]
async fn test_get_state_uses_wire_format() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(Request::get("/api/state").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["version"], 0);
    assert!(json["timestamp"].is_string());
    assert!(close(json["state"]["coherence"].as_f64().unwrap(), 72.0));
}

#[tokio::test]
async fn test_post_contribution_applies_weighted_delta() {
    let state = make_test_state().await;
    let router = build_router(Arc::clone(&state));

    let body = serde_json::json!({
        "source_id": "agent-1",
        "channel": "coherence",
        "delta": 100.0,
        "kind": "message",
    });
    let response = router
        .oneshot(post_json("/api/contributions", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["outcome"], "applied");
    assert_eq!(json["state"]["version"], 1);

    let snapshot = state.store.snapshot().await;
    assert!(close(snapshot.get("coherence").unwrap(), 73.0));
}

#[tokio::test]
async fn test_post_contribution_unknown_channel_is_dropped() {
    let state = make_test_state().await;
    let router = build_router(Arc::clone(&state));

    let body = serde_json::json!({
        "source_id": "agent-1",
        "channel": "love",
        "delta": 1.0,
        "kind": "message",
    });
    let response = router
        .oneshot(post_json("/api/contributions", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["outcome"], "dropped");
    assert_eq!(json["error"], "unknown_channel");
    assert_eq!(state.store.snapshot().await.version, 0);
}

#[tokio::test]
async fn test_post_contribution_unknown_kind_is_dropped() {
    let router = build_router(make_test_state().await);

    let body = serde_json::json!({
        "source_id": "agent-1",
        "channel": "coherence",
        "delta": 1.0,
        "kind": "sigil",
    });
    let response = router
        .oneshot(post_json("/api/contributions", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["error"], "unknown_kind");
    assert_eq!(json["kind"], "sigil");
}

#[tokio::test]
async fn test_post_contribution_missing_fields_is_dropped() {
    let router = build_router(make_test_state().await);

    let body = serde_json::json!({ "channel": "coherence" });
    let response = router
        .oneshot(post_json("/api/contributions", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["error"], "malformed");
}

#[tokio::test]
async fn test_post_contribution_is_buffered_with_cooldown() {
    let mut config = test_config();
    config.rate_limit.cooldown_ms = 60_000;
    let state = Arc::new(AppState::from_config(&config, None).await.unwrap());
    let router = build_router(Arc::clone(&state));

    let body = serde_json::json!({
        "source_id": "agent-1",
        "channel": "coherence",
        "delta": 1.0,
        "kind": "practice",
    });
    let response = router
        .oneshot(post_json("/api/contributions", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["outcome"], "buffered");
    assert_eq!(json["pending"], 1);
    assert_eq!(state.processor.pending_windows().await, 1);
}

// =========================================================================
// History, analytics, transitions
// =========================================================================

#[tokio::test]
async fn test_history_since_and_limit() {
    let state = make_test_state().await;
    for _ in 0..5 {
        state.store.mutate("coherence", 1.0).await.unwrap();
    }
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::get("/api/history?since=2&limit=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["count"], 2);
    assert_eq!(json["available"], 3);
    assert_eq!(json["oldest_version"], 1);
    assert_eq!(json["entries"][0]["version"], 3);
    assert_eq!(json["entries"][1]["version"], 4);
}

#[tokio::test]
async fn test_history_zero_limit_is_bad_request() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(
            Request::get("/api/history?limit=0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn test_analytics_for_channel() {
    let state = make_test_state().await;
    state.store.mutate("coherence", 2.0).await.unwrap();
    state.store.mutate("coherence", -4.0).await.unwrap();
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::get("/api/analytics/coherence")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert!(close(json["current"].as_f64().unwrap(), 70.0));
    assert_eq!(json["analytics"]["samples"], 2);
    assert!(close(json["analytics"]["trend"].as_f64().unwrap(), -4.0));
}

#[tokio::test]
async fn test_analytics_unknown_channel_is_not_found() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(
            Request::get("/api/analytics/love")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_transitions_record_crossings() {
    let state = make_test_state().await;
    // Default thresholds watch coherence at 80 and 50; it starts at 72.
    state.store.mutate("coherence", 10.0).await.unwrap();
    state.store.mutate("coherence", -40.0).await.unwrap();
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::get("/api/transitions?channel=coherence")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["count"], 3);
    assert_eq!(json["transitions"][0]["name"], "resonant");
    assert_eq!(json["transitions"][0]["direction"], "rising");
    assert_eq!(json["transitions"][2]["name"], "warning");
    assert_eq!(json["transitions"][2]["direction"], "falling");
}

// =========================================================================
// Restore and streams
// =========================================================================

#[tokio::test]
async fn test_restored_state_is_served() {
    let mut restored = AggregateState::initial(&[ChannelSpec::new("coherence", 0.0, 100.0, 72.0)]);
    restored.version = 41;
    let state = Arc::new(
        AppState::from_config(&test_config(), Some(&restored))
            .await
            .unwrap(),
    );
    let router = build_router(state);

    let response = router
        .oneshot(Request::get("/api/state").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["version"], 41);
    assert!(json["state"]["resonance"].is_number());
}

#[tokio::test]
async fn test_sse_stream_starts_with_current_state() {
    let state = make_test_state().await;
    let router = build_router(Arc::clone(&state));

    let response = router
        .oneshot(Request::get("/sse/state").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/event-stream"));
    assert_eq!(state.hub.subscriber_count(), 1);

    let mut frames = response.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(1), frames.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.contains("event: state"));
    assert!(text.contains("\"version\":0"));

    drop(frames);
    for _ in 0..100 {
        if state.hub.subscriber_count() == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(state.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn test_subscribers_lists_stream_clients() {
    let state = make_test_state().await;
    let (transport, _rx) = resonance_core::hub::ChannelTransport::pair(4);
    let id = state.hub.subscribe(Box::new(transport));
    let router = build_router(state);

    let response = router
        .oneshot(Request::get("/api/subscribers").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["subscribers"][0]["id"], id.to_string());
}

#[tokio::test]
async fn test_ws_route_requires_upgrade() {
    let router = build_router(make_test_state().await);

    let response = router
        .oneshot(Request::get("/ws/state").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test]
async fn test_stop_observer_flushes_windows_after_server_drains() {
    let mut config = test_config();
    config.rate_limit.cooldown_ms = 60_000;
    let state = Arc::new(AppState::from_config(&config, None).await.unwrap());
    let server_config = ServerConfig {
        host: String::from("127.0.0.1"),
        port: 0,
    };
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = spawn_observer(&server_config, Arc::clone(&state), async move {
        let _ = shutdown_rx.await;
    })
    .await
    .unwrap();

    let (transport, _rx) = resonance_core::hub::ChannelTransport::pair(4);
    state.hub.subscribe(Box::new(transport));
    let outcome = state
        .processor
        .apply(Contribution::new("late-producer", "coherence", 1.0, ContributionKind::Practice))
        .await;
    assert!(!matches!(outcome, resonance_core::processor::ApplyOutcome::Applied { .. }));
    assert_eq!(state.processor.pending_windows().await, 1);

    let report = stop_observer(&state, shutdown_tx, server).await;

    assert_eq!(
        report,
        ShutdownReport {
            disconnected: 1,
            flushed: 1,
        }
    );
    assert_eq!(state.processor.pending_windows().await, 0);
    assert_eq!(state.hub.subscriber_count(), 0);
    assert_eq!(state.store.snapshot().await.version, 1);
}
