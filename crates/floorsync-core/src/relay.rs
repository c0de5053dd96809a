//! The event relay: validates client intents, applies them to the state
//! mirror, and resolves who must receive what.
//!
//! [`RelayState`] owns the registry, the room router and the mirror
//! together. It is meant to have exactly one owner, which feeds it events
//! one at a time; recipients are resolved within the same call that mutates
//! state, so a dispatch never reflects a half-applied update.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
  Error,
  identity::{ConnectionId, Handshake, Role},
  mirror::{Snapshot, StateMirror},
  protocol::{
    ClientMessage, HeartbeatAck, HistoryPayload, HistoryUpdate, JoinRequest,
    QuantityPayload, QuantityUpdate, RoomJoined, ServerMessage, StatusPayload,
    StatusUpdate,
  },
  registry::{ConnectionEntry, ConnectionRegistry},
  room::{Room, RoomRouter},
};

/// Outbound messages and the connections they must reach.
///
/// The messages form one ordered unit: a transport must deliver all of them
/// or none, and queues them as a single entry per recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
  pub recipients: Vec<ConnectionId>,
  pub messages:   Vec<ServerMessage>,
}

impl Dispatch {
  pub fn new(recipients: Vec<ConnectionId>, message: ServerMessage) -> Self {
    Self { recipients, messages: vec![message] }
  }

  pub fn to(id: ConnectionId, message: ServerMessage) -> Self {
    Self::new(vec![id], message)
  }
}

#[derive(Debug, Default)]
pub struct RelayState {
  registry: ConnectionRegistry,
  router:   RoomRouter,
  mirror:   StateMirror,
}

impl RelayState {
  pub fn new() -> Self { Self::default() }

  pub fn registry(&self) -> &ConnectionRegistry { &self.registry }

  pub fn router(&self) -> &RoomRouter { &self.router }

  pub fn snapshot(&self) -> Snapshot { self.mirror.snapshot() }

  // ── Lifecycle ─────────────────────────────────────────────────────────

  /// Register a freshly opened connection. Identity stays unset until it
  /// joins.
  pub fn connect(&mut self, id: ConnectionId, handshake: &Handshake) -> bool {
    let added = self.registry.register(id, handshake.client_id.clone());
    if added {
      info!(
        connection_id = %id,
        client_id = handshake.client_id.as_deref().unwrap_or("-"),
        clients = self.registry.count(),
        "connection registered"
      );
    }
    added
  }

  /// Drop every trace of `id` from the registry and rooms. Idempotent.
  /// Mirror facts produced by the connection are kept.
  pub fn disconnect(&mut self, id: ConnectionId) -> Option<ConnectionEntry> {
    let rooms = self.router.rooms_of(id);
    self.router.leave_all(id);
    let entry = self.registry.unregister(id);
    if entry.is_some() {
      info!(
        connection_id = %id,
        rooms = ?rooms.iter().map(ToString::to_string).collect::<Vec<_>>(),
        clients = self.registry.count(),
        "connection unregistered"
      );
    }
    entry
  }

  // ── Intents ───────────────────────────────────────────────────────────

  /// Apply one message from `from`. Messages from connections that are not
  /// registered are dropped.
  pub fn handle(
    &mut self,
    from: ConnectionId,
    message: ClientMessage,
    now: DateTime<Utc>,
  ) -> Vec<Dispatch> {
    if !self.registry.contains(from) {
      debug!(connection_id = %from, event = message.event(), "message from unknown connection");
      return Vec::new();
    }
    debug!(connection_id = %from, event = message.event(), "intent");

    let result = match message {
      ClientMessage::JoinRoom(req) => self.join(from, req, now),
      ClientMessage::UpdateOrderStatus(payload) => self.update_status(from, payload),
      ClientMessage::UpdateOrderQuantity(payload) => {
        self.update_quantity(from, payload, now)
      }
      ClientMessage::UpdateOrderHistory(payload) => self.update_history(from, payload),
      ClientMessage::Heartbeat => Ok(vec![self.heartbeat(from, now)]),
    };

    result.unwrap_or_else(|err| self.reject(from, &err))
  }

  /// Report a malformed message back to its sender only.
  pub fn reject(&self, from: ConnectionId, err: &Error) -> Vec<Dispatch> {
    if !self.registry.contains(from) {
      return Vec::new();
    }
    warn!(connection_id = %from, error = %err, "rejected intent");
    vec![Dispatch::to(from, ServerMessage::error(err))]
  }

  /// Fan out a status update that arrived from outside the socket surface.
  /// There is no sender to acknowledge.
  pub fn relay_status(&self, update: StatusUpdate) -> Vec<Dispatch> {
    debug!(order_id = %update.order_id, item_id = %update.item_id, "bridged status update");
    self.status_fan_out(update)
  }

  fn join(
    &mut self,
    from: ConnectionId,
    req: JoinRequest,
    now: DateTime<Utc>,
  ) -> Result<Vec<Dispatch>, Error> {
    let tag = req.role.filter(|r| !r.is_empty()).ok_or(Error::MissingField("role"))?;
    let role = Role::parse(&tag);
    let team = req.team.as_deref();

    self.registry.join_identity(from, role, team, now);
    let room = self.router.join(from, role, team);

    match &room {
      Some(room) => info!(connection_id = %from, %room, "joined room"),
      None => info!(connection_id = %from, role = %tag, team = team.unwrap_or("-"), "join matched no room"),
    }

    let success = room.is_some();
    let mut reply = Dispatch::to(
      from,
      ServerMessage::RoomJoined(RoomJoined { room, success }),
    );
    if role == Some(Role::Dispatcher) {
      reply.messages.extend(self.sync_on_join(from));
    }
    Ok(vec![reply])
  }

  /// The whole mirror as replay messages for a dispatcher that just joined.
  /// They ride in the same dispatch as the join confirmation, so a large
  /// mirror never competes with the joiner's queue capacity.
  fn sync_on_join(&self, to: ConnectionId) -> Vec<ServerMessage> {
    if self.mirror.is_empty() {
      return Vec::new();
    }
    let snapshot = self.mirror.snapshot();
    debug!(
      connection_id = %to,
      quantities = snapshot.quantities.len(),
      histories = snapshot.histories.len(),
      "replaying mirror"
    );
    let quantities = snapshot
      .quantities
      .iter()
      .map(|fact| ServerMessage::OrderQuantityUpdate(fact.into()));
    let histories = snapshot
      .histories
      .iter()
      .map(|fact| ServerMessage::OrderHistoryUpdate(fact.into()));
    quantities.chain(histories).collect()
  }

  fn update_status(
    &self,
    from: ConnectionId,
    payload: StatusPayload,
  ) -> Result<Vec<Dispatch>, Error> {
    let update = payload.validate()?;
    let ack = Dispatch::to(from, ServerMessage::confirmation("Status update received", &update));
    let mut out = self.status_fan_out(update);
    out.push(ack);
    Ok(out)
  }

  fn status_fan_out(&self, update: StatusUpdate) -> Vec<Dispatch> {
    let mut out = vec![Dispatch::new(
      self.members(&[Room::Dispatchers]),
      ServerMessage::OrderStatusUpdated(update.clone()),
    )];
    if let Some(team) = update.team.clone() {
      out.push(Dispatch::new(
        self.members(&[Room::Team(team)]),
        ServerMessage::TeamOrderStatusUpdated(update),
      ));
    }
    out
  }

  fn update_quantity(
    &mut self,
    from: ConnectionId,
    payload: QuantityPayload,
    now: DateTime<Utc>,
  ) -> Result<Vec<Dispatch>, Error> {
    let update: QuantityUpdate = payload.validate()?;
    self.mirror.put_quantity(
      &update.order_id,
      &update.item_id,
      update.quantity,
      &update.team,
      now,
    );

    let recipients = self.members(&[Room::Dispatchers, Room::Team(update.team.clone())]);
    let ack = ServerMessage::confirmation("Quantity update received", &update);
    Ok(vec![
      Dispatch::new(recipients, ServerMessage::OrderQuantityUpdate(update)),
      Dispatch::to(from, ack),
    ])
  }

  fn update_history(
    &mut self,
    from: ConnectionId,
    payload: HistoryPayload,
  ) -> Result<Vec<Dispatch>, Error> {
    let update: HistoryUpdate = payload.validate()?;
    self.mirror.put_history(&update.order_id, update.history.clone());

    let mut rooms = vec![Room::Dispatchers];
    if let Some(team) = self.registry.get(from).and_then(|e| e.team.clone()) {
      rooms.push(Room::Team(team));
    }
    let recipients = self.members(&rooms);
    let ack = ServerMessage::confirmation("History update received", &update);
    Ok(vec![
      Dispatch::new(recipients, ServerMessage::OrderHistoryUpdate(update)),
      Dispatch::to(from, ack),
    ])
  }

  fn heartbeat(&self, from: ConnectionId, now: DateTime<Utc>) -> Dispatch {
    Dispatch::to(
      from,
      ServerMessage::HeartbeatAck(HeartbeatAck {
        received:     true,
        timestamp:    now,
        client_count: self.registry.count(),
      }),
    )
  }

  /// Union of the members of `rooms`, each connection listed once.
  fn members(&self, rooms: &[Room]) -> Vec<ConnectionId> {
    rooms
      .iter()
      .flat_map(|room| self.router.members(room))
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect()
  }
}
