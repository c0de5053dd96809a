//! Connection identity: transport-level ids and the role/team tags a client
//! declares about itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one live transport connection. A fresh id is minted for every
/// connection, so ids are never shared by two live entries.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
  Deserialize,
)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
  pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for ConnectionId {
  fn default() -> Self { Self::new() }
}

impl fmt::Display for ConnectionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}

/// The role a client declares when joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Dispatcher,
  Team,
}

impl Role {
  /// Parse a wire role tag. Matching is exact; anything else is `None`.
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "dispatcher" => Some(Self::Dispatcher),
      "team" => Some(Self::Team),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Dispatcher => "dispatcher",
      Self::Team => "team",
    }
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Identity parameters supplied out-of-band when a connection is opened.
/// All of them are self-reported and unverified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
  pub client_id: Option<String>,
  pub role:      Option<String>,
  pub team:      Option<String>,
}
