//! Network surface of the floorsync relay.
//!
//! Exposes an axum [`Router`] with the WebSocket endpoint clients connect
//! to, plus the REST bridge, all backed by one running [`hub::Hub`].

pub mod bridge;
pub mod error;
pub mod hub;
pub mod ws;

pub use error::ApiError;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use hub::{HubHandle, OverflowPolicy};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `relay.toml` and `FLOORSYNC_*`
/// environment variables. Every field has a default.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
  pub host:               String,
  pub port:               u16,
  /// Capacity of each connection's outbound queue, in batches. A join and
  /// its mirror replay occupy a single entry.
  pub outbound_queue:     usize,
  /// Capacity of the hub's command channel.
  pub command_buffer:     usize,
  pub overflow_policy:    OverflowPolicy,
  /// Join rooms from the connect-time role/team without waiting for
  /// `joinRoom`.
  pub auto_join:          bool,
  /// Server ping period; `0` disables pings.
  pub ping_interval_secs: u64,
}

impl Default for RelayConfig {
  fn default() -> Self {
    Self {
      host:               "0.0.0.0".to_string(),
      port:               3001,
      outbound_queue:     256,
      command_buffer:     1024,
      overflow_policy:    OverflowPolicy::Drop,
      auto_join:          false,
      ping_interval_secs: 30,
    }
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState {
  pub hub:    HubHandle,
  pub config: Arc<RelayConfig>,
}

// ─── Router ───────────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/ws", get(ws::upgrade))
    .route("/api/orders/{order_id}/status", post(bridge::update_status))
    .route("/api/health", get(bridge::health))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Integration tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use floorsync_core::{
    Handshake,
    protocol::{ClientMessage, JoinRequest, ServerMessage},
  };
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  use crate::hub::{Hub, Outbound};

  fn recv(rx: &mut tokio::sync::mpsc::Receiver<Outbound>) -> Option<ServerMessage> {
    rx.try_recv().ok().and_then(|batch| batch.first().cloned())
  }

  fn make_state() -> AppState {
    let config = RelayConfig { ping_interval_secs: 0, ..RelayConfig::default() };
    let (hub, handle) = Hub::new(&config);
    tokio::spawn(hub.run());
    AppState { hub: handle, config: Arc::new(config) }
  }

  async fn oneshot_json(
    state: AppState,
    method: &str,
    uri: &str,
    body: Value,
  ) -> (StatusCode, Value) {
    let req = Request::builder()
      .method(method)
      .uri(uri)
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(body.to_string()))
      .unwrap();
    let resp = router(state).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
  }

  #[tokio::test]
  async fn health_reports_client_count() {
    let state = make_state();
    let (_id, _rx) = state.hub.connect(Handshake::default()).await.unwrap();

    let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
    let resp = router(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({"status": "ok", "clientCount": 1}));
  }

  #[tokio::test]
  async fn status_bridge_fans_out_to_rooms() {
    let state = make_state();
    let (dispatcher, mut dispatcher_rx) =
      state.hub.connect(Handshake::default()).await.unwrap();
    let (team, mut team_rx) = state.hub.connect(Handshake::default()).await.unwrap();
    state
      .hub
      .submit(dispatcher, ClientMessage::JoinRoom(JoinRequest {
        role: Some("dispatcher".into()),
        team: None,
      }))
      .await
      .unwrap();
    state
      .hub
      .submit(team, ClientMessage::JoinRoom(JoinRequest {
        role: Some("team".into()),
        team: Some("boxes".into()),
      }))
      .await
      .unwrap();

    let (status, body) = oneshot_json(
      state.clone(),
      "POST",
      "/api/orders/O42/status",
      json!({"itemId": "I1", "team": "boxes", "status": "in_progress", "completedQuantity": 3}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({"accepted": true}));

    // Commands are applied in order, so once this returns the bridged
    // update has been delivered.
    state.hub.client_count().await.unwrap();

    assert_eq!(recv(&mut dispatcher_rx).unwrap().event(), "roomJoined");
    let ServerMessage::OrderStatusUpdated(update) = recv(&mut dispatcher_rx).unwrap() else {
      panic!("expected orderStatusUpdated");
    };
    assert_eq!(update.order_id, "O42");
    assert_eq!(update.completed_quantity, Some(3));
    assert!(recv(&mut dispatcher_rx).is_none());

    assert_eq!(recv(&mut team_rx).unwrap().event(), "roomJoined");
    assert_eq!(recv(&mut team_rx).unwrap().event(), "teamOrderStatusUpdated");
    assert!(recv(&mut team_rx).is_none());
  }

  #[tokio::test]
  async fn status_bridge_rejects_missing_fields() {
    let state = make_state();
    let (status, body) = oneshot_json(
      state.clone(),
      "POST",
      "/api/orders/O42/status",
      json!({"itemId": "I1"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("status"), "body: {body}");

    let snapshot = state.hub.snapshot().await.unwrap();
    assert!(snapshot.quantities.is_empty());
  }

  #[test]
  fn omitted_keys_take_defaults() {
    let config: RelayConfig = serde_json::from_value(json!({"port": 4000})).unwrap();
    assert_eq!(config.port, 4000);
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.outbound_queue, 256);
    assert_eq!(config.command_buffer, 1024);
    assert_eq!(config.overflow_policy, OverflowPolicy::Drop);
    assert!(!config.auto_join);
    assert_eq!(config.ping_interval_secs, 30);
  }

  #[tokio::test]
  async fn unavailable_hub_returns_503() {
    let config = RelayConfig::default();
    let (hub, handle) = Hub::new(&config);
    drop(hub);
    let state = AppState { hub: handle, config: Arc::new(config) };

    let (status, _) =
      oneshot_json(state, "GET", "/api/health", Value::Null).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
  }
}
