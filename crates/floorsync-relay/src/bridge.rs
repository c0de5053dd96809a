//! Request/response entry points into the relay.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/api/orders/{order_id}/status` | Body: [`StatusPayload`] minus `orderId`; returns 202 |
//! | `GET`  | `/api/health` | Live connection count |
//!
//! The status endpoint only relays: it does not touch any order storage. A
//! persistence layer that wants status changes must react to the same
//! intent on its own.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use floorsync_core::protocol::StatusPayload;
use serde_json::json;

use crate::{AppState, error::ApiError};

/// `POST /api/orders/{order_id}/status`. The path's order id overrides any
/// `orderId` in the body.
pub async fn update_status(
  State(state): State<AppState>,
  Path(order_id): Path<String>,
  Json(mut body): Json<StatusPayload>,
) -> Result<impl IntoResponse, ApiError> {
  body.order_id = Some(order_id);
  let update = body.validate()?;
  tracing::info!(
    order_id = %update.order_id,
    item_id = %update.item_id,
    status = %update.status,
    "bridging status update"
  );
  state.hub.bridge_status(update).await?;
  Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))))
}

/// `GET /api/health`
pub async fn health(
  State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
  let clients = state.hub.client_count().await?;
  Ok(Json(json!({ "status": "ok", "clientCount": clients })))
}
