//! The state mirror: an in-memory, last-write-wins cache of the most recent
//! quantity and history updates, used to bring late-joining dispatchers up
//! to date.
//!
//! Writes overwrite by arrival order. Embedded client timestamps are not
//! compared, so a delayed update replaces a newer one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Latest known quantity for one (order, item) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityFact {
  pub order_id:   String,
  pub item_id:    String,
  pub quantity:   i64,
  pub team:       String,
  pub updated_at: DateTime<Utc>,
}

/// Latest known history sequence for one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFact {
  pub order_id: String,
  /// Opaque client-defined entries, replaced wholesale on every update.
  pub history:  Vec<Value>,
}

/// Point-in-time copy of the whole mirror.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
  pub quantities: Vec<QuantityFact>,
  pub histories:  Vec<HistoryFact>,
}

#[derive(Debug, Default)]
pub struct StateMirror {
  quantities: BTreeMap<(String, String), QuantityFact>,
  histories:  BTreeMap<String, HistoryFact>,
}

impl StateMirror {
  pub fn new() -> Self { Self::default() }

  /// Store `quantity` for (`order_id`, `item_id`), replacing any previous
  /// fact for that key. Returns the replaced fact.
  pub fn put_quantity(
    &mut self,
    order_id: &str,
    item_id: &str,
    quantity: i64,
    team: &str,
    at: DateTime<Utc>,
  ) -> Option<QuantityFact> {
    let fact = QuantityFact {
      order_id:   order_id.to_string(),
      item_id:    item_id.to_string(),
      quantity,
      team:       team.to_string(),
      updated_at: at,
    };
    self
      .quantities
      .insert((order_id.to_string(), item_id.to_string()), fact)
  }

  /// Replace the history sequence of `order_id`. Returns the replaced fact.
  pub fn put_history(
    &mut self,
    order_id: &str,
    entries: Vec<Value>,
  ) -> Option<HistoryFact> {
    let fact = HistoryFact {
      order_id: order_id.to_string(),
      history:  entries,
    };
    self.histories.insert(order_id.to_string(), fact)
  }

  pub fn quantity(&self, order_id: &str, item_id: &str) -> Option<&QuantityFact> {
    self
      .quantities
      .get(&(order_id.to_string(), item_id.to_string()))
  }

  pub fn history(&self, order_id: &str) -> Option<&HistoryFact> {
    self.histories.get(order_id)
  }

  pub fn snapshot(&self) -> Snapshot {
    Snapshot {
      quantities: self.quantities.values().cloned().collect(),
      histories:  self.histories.values().cloned().collect(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.quantities.is_empty() && self.histories.is_empty()
  }
}
