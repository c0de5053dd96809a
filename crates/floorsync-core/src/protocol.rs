//! Wire protocol: JSON envelopes of the form `{"event": <name>, "data": {..}}`
//! in both directions.
//!
//! Inbound payloads deserialize leniently (every field optional) so that a
//! missing field is reported as a validation error naming the field rather
//! than as an opaque decoding failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{Error, Result, mirror::{HistoryFact, QuantityFact}, room::Room};

// ─── Inbound ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Frame {
  event: String,
  #[serde(default)]
  data:  Value,
}

/// A decoded client-to-relay message. Payload fields are not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
  JoinRoom(JoinRequest),
  UpdateOrderStatus(StatusPayload),
  UpdateOrderQuantity(QuantityPayload),
  UpdateOrderHistory(HistoryPayload),
  Heartbeat,
}

impl ClientMessage {
  /// Decode one text frame.
  pub fn from_json(text: &str) -> Result<Self> {
    let frame: Frame = serde_json::from_str(text)?;
    let data = match frame.data {
      Value::Null => Value::Object(Map::new()),
      data => data,
    };
    match frame.event.as_str() {
      "joinRoom" => payload("joinRoom", data).map(Self::JoinRoom),
      "updateOrderStatus" => {
        payload("updateOrderStatus", data).map(Self::UpdateOrderStatus)
      }
      "updateOrderQuantity" => {
        payload("updateOrderQuantity", data).map(Self::UpdateOrderQuantity)
      }
      "updateOrderHistory" => {
        payload("updateOrderHistory", data).map(Self::UpdateOrderHistory)
      }
      "heartbeat" => Ok(Self::Heartbeat),
      _ => Err(Error::UnknownEvent(frame.event)),
    }
  }

  pub fn event(&self) -> &'static str {
    match self {
      Self::JoinRoom(_) => "joinRoom",
      Self::UpdateOrderStatus(_) => "updateOrderStatus",
      Self::UpdateOrderQuantity(_) => "updateOrderQuantity",
      Self::UpdateOrderHistory(_) => "updateOrderHistory",
      Self::Heartbeat => "heartbeat",
    }
  }
}

fn payload<T: DeserializeOwned>(event: &'static str, data: Value) -> Result<T> {
  serde_json::from_value(data)
    .map_err(|source| Error::MalformedPayload { event, source })
}

/// Accepts identifiers sent either as strings or as bare JSON numbers.
fn identifier<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Repr {
    Text(String),
    Number(serde_json::Number),
  }

  Ok(Option::<Repr>::deserialize(deserializer)?.map(|repr| match repr {
    Repr::Text(s) => s,
    Repr::Number(n) => n.to_string(),
  }))
}

/// Empty strings count as missing.
fn required(value: Option<String>, field: &'static str) -> Result<String> {
  value
    .filter(|v| !v.is_empty())
    .ok_or(Error::MissingField(field))
}

/// `joinRoom` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JoinRequest {
  pub role: Option<String>,
  pub team: Option<String>,
}

/// `updateOrderStatus` payload, also accepted by the REST bridge.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
  #[serde(default, deserialize_with = "identifier")]
  pub order_id:           Option<String>,
  #[serde(default, deserialize_with = "identifier")]
  pub item_id:            Option<String>,
  pub team:               Option<String>,
  pub status:             Option<String>,
  pub completed_quantity: Option<i64>,
}

impl StatusPayload {
  pub fn validate(self) -> Result<StatusUpdate> {
    Ok(StatusUpdate {
      order_id:           required(self.order_id, "orderId")?,
      item_id:            required(self.item_id, "itemId")?,
      team:               self.team.filter(|t| !t.is_empty()),
      status:             required(self.status, "status")?,
      completed_quantity: self.completed_quantity,
    })
  }
}

/// `updateOrderQuantity` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityPayload {
  #[serde(default, deserialize_with = "identifier")]
  pub order_id: Option<String>,
  #[serde(default, deserialize_with = "identifier")]
  pub item_id:  Option<String>,
  pub quantity: Option<i64>,
  pub team:     Option<String>,
}

impl QuantityPayload {
  pub fn validate(self) -> Result<QuantityUpdate> {
    Ok(QuantityUpdate {
      order_id: required(self.order_id, "orderId")?,
      item_id:  required(self.item_id, "itemId")?,
      quantity: self.quantity.ok_or(Error::MissingField("quantity"))?,
      team:     required(self.team, "team")?,
    })
  }
}

/// `updateOrderHistory` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPayload {
  #[serde(default, deserialize_with = "identifier")]
  pub order_id: Option<String>,
  pub history:  Option<Vec<Value>>,
}

impl HistoryPayload {
  pub fn validate(self) -> Result<HistoryUpdate> {
    Ok(HistoryUpdate {
      order_id: required(self.order_id, "orderId")?,
      history:  self.history.ok_or(Error::MissingField("history"))?,
    })
  }
}

// ─── Validated intents (also outbound payloads) ──────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
  pub order_id:           String,
  pub item_id:            String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub team:               Option<String>,
  pub status:             String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_quantity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityUpdate {
  pub order_id: String,
  pub item_id:  String,
  pub quantity: i64,
  pub team:     String,
}

impl From<&QuantityFact> for QuantityUpdate {
  fn from(fact: &QuantityFact) -> Self {
    Self {
      order_id: fact.order_id.clone(),
      item_id:  fact.item_id.clone(),
      quantity: fact.quantity,
      team:     fact.team.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryUpdate {
  pub order_id: String,
  pub history:  Vec<Value>,
}

impl From<&HistoryFact> for HistoryUpdate {
  fn from(fact: &HistoryFact) -> Self {
    Self {
      order_id: fact.order_id.clone(),
      history:  fact.history.clone(),
    }
  }
}

// ─── Outbound ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomJoined {
  /// `None` when the declared role/team maps to no room.
  pub room:    Option<Room>,
  pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confirmation {
  pub success: bool,
  pub message: String,
  pub data:    Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
  pub message: String,
  pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
  pub received:     bool,
  pub timestamp:    DateTime<Utc>,
  pub client_count: usize,
}

/// A relay-to-client message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
  RoomJoined(RoomJoined),
  OrderStatusUpdated(StatusUpdate),
  TeamOrderStatusUpdated(StatusUpdate),
  OrderQuantityUpdate(QuantityUpdate),
  OrderHistoryUpdate(HistoryUpdate),
  UpdateConfirmation(Confirmation),
  Error(ErrorReport),
  HeartbeatAck(HeartbeatAck),
}

impl ServerMessage {
  pub fn error(err: &Error) -> Self {
    Self::Error(ErrorReport {
      message: err.summary().to_string(),
      details: err.to_string(),
    })
  }

  /// Acknowledge an accepted intent, echoing its payload.
  pub fn confirmation(message: impl Into<String>, data: &impl Serialize) -> Self {
    Self::UpdateConfirmation(Confirmation {
      success: true,
      message: message.into(),
      data:    serde_json::to_value(data).unwrap_or_default(),
    })
  }

  pub fn event(&self) -> &'static str {
    match self {
      Self::RoomJoined(_) => "roomJoined",
      Self::OrderStatusUpdated(_) => "orderStatusUpdated",
      Self::TeamOrderStatusUpdated(_) => "teamOrderStatusUpdated",
      Self::OrderQuantityUpdate(_) => "orderQuantityUpdate",
      Self::OrderHistoryUpdate(_) => "orderHistoryUpdate",
      Self::UpdateConfirmation(_) => "updateConfirmation",
      Self::Error(_) => "error",
      Self::HeartbeatAck(_) => "heartbeatAck",
    }
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string(self)
  }
}
