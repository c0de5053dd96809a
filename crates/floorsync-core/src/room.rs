//! Broadcast groups and the router that maintains their membership.
//!
//! Room naming is a pure function of role and team: dispatchers share the
//! literal `dispatchers` room, each team gets `team-<name>` (verbatim,
//! case-sensitive). Membership only grows on join and is cleared on
//! disconnect.

use std::{
  collections::{BTreeSet, HashMap},
  fmt,
};

use serde::{Serialize, Serializer};

use crate::identity::{ConnectionId, Role};

// ─── Room ────────────────────────────────────────────────────────────────────

/// A named broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Room {
  Dispatchers,
  Team(String),
}

impl Room {
  /// The room implied by a role/team declaration, if any.
  ///
  /// A `team` role needs a non-empty team name; a dispatcher's team tag is
  /// ignored. Every other combination maps to no room.
  pub fn for_identity(role: Option<Role>, team: Option<&str>) -> Option<Self> {
    match (role?, team) {
      (Role::Dispatcher, _) => Some(Self::Dispatchers),
      (Role::Team, Some(team)) if !team.is_empty() => {
        Some(Self::Team(team.to_string()))
      }
      (Role::Team, _) => None,
    }
  }

  pub fn team(team: impl Into<String>) -> Self { Self::Team(team.into()) }
}

impl fmt::Display for Room {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Dispatchers => f.write_str("dispatchers"),
      Self::Team(team) => write!(f, "team-{team}"),
    }
  }
}

impl Serialize for Room {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Room membership, keyed by room. Empty rooms are dropped.
#[derive(Debug, Default)]
pub struct RoomRouter {
  rooms: HashMap<Room, BTreeSet<ConnectionId>>,
}

impl RoomRouter {
  pub fn new() -> Self { Self::default() }

  /// Add `id` to the room implied by `role`/`team` and return that room.
  /// Returns `None`, and changes nothing, when no room applies.
  pub fn join(
    &mut self,
    id: ConnectionId,
    role: Option<Role>,
    team: Option<&str>,
  ) -> Option<Room> {
    let room = Room::for_identity(role, team)?;
    self.rooms.entry(room.clone()).or_default().insert(id);
    Some(room)
  }

  /// Remove `id` from every room it belongs to.
  pub fn leave_all(&mut self, id: ConnectionId) {
    self.rooms.retain(|_, members| {
      members.remove(&id);
      !members.is_empty()
    });
  }

  /// Current members of `room`, in id order.
  pub fn members(&self, room: &Room) -> impl Iterator<Item = ConnectionId> + '_ {
    self.rooms.get(room).into_iter().flatten().copied()
  }

  /// Every room `id` currently belongs to.
  pub fn rooms_of(&self, id: ConnectionId) -> Vec<Room> {
    let mut rooms: Vec<Room> = self
      .rooms
      .iter()
      .filter(|(_, members)| members.contains(&id))
      .map(|(room, _)| room.clone())
      .collect();
    rooms.sort();
    rooms
  }
}
