//! The connection registry: one entry per live connection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::identity::{ConnectionId, Role};

/// What the relay knows about one live connection.
///
/// Identity fields stay unset until the client's join request is processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEntry {
  pub connection_id: ConnectionId,
  /// Self-reported; not guaranteed unique.
  pub client_id:     Option<String>,
  pub role:          Option<Role>,
  /// Only meaningful for the `team` role.
  pub team:          Option<String>,
  pub connected_at:  Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
  entries: HashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
  pub fn new() -> Self { Self::default() }

  /// Record a new connection. Returns `false` and leaves the existing entry
  /// untouched if `id` is already live.
  pub fn register(&mut self, id: ConnectionId, client_id: Option<String>) -> bool {
    if self.entries.contains_key(&id) {
      return false;
    }
    self.entries.insert(id, ConnectionEntry {
      connection_id: id,
      client_id,
      role: None,
      team: None,
      connected_at: None,
    });
    true
  }

  /// Set the declared identity of `id`. A team name is only kept for the
  /// `team` role. Unknown ids are ignored; returns whether `id` was live.
  pub fn join_identity(
    &mut self,
    id: ConnectionId,
    role: Option<Role>,
    team: Option<&str>,
    at: DateTime<Utc>,
  ) -> bool {
    let Some(entry) = self.entries.get_mut(&id) else {
      return false;
    };
    entry.role = role;
    entry.team = match role {
      Some(Role::Team) => team.filter(|t| !t.is_empty()).map(str::to_string),
      _ => None,
    };
    entry.connected_at = Some(at);
    true
  }

  /// Remove `id`. Idempotent.
  pub fn unregister(&mut self, id: ConnectionId) -> Option<ConnectionEntry> {
    self.entries.remove(&id)
  }

  pub fn get(&self, id: ConnectionId) -> Option<&ConnectionEntry> {
    self.entries.get(&id)
  }

  pub fn contains(&self, id: ConnectionId) -> bool {
    self.entries.contains_key(&id)
  }

  pub fn count(&self) -> usize { self.entries.len() }
}
