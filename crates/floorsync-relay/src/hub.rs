//! The hub: the single task that owns [`RelayState`] and every connection's
//! outbound queue.
//!
//! All lifecycle events and intents reach the hub through one bounded
//! command channel and are applied strictly one after another, so the
//! registry, rooms and mirror are never observed half-updated. Delivery to
//! connections is a non-blocking `try_send` into each connection's bounded
//! queue; a full queue is handled by the configured [`OverflowPolicy`] and
//! never stalls delivery to anyone else.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use floorsync_core::{
  ConnectionId, Dispatch, Handshake, RelayState, Role, Room,
  mirror::Snapshot,
  protocol::{ClientMessage, JoinRequest, ServerMessage, StatusUpdate},
};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::RelayConfig;

/// One queue entry for a connection: an ordered batch of messages, shared
/// between all recipients of the same dispatch. A join confirmation and its
/// mirror replay travel as one entry, so replay never counts against the
/// queue capacity message by message.
pub type Outbound = Arc<[ServerMessage]>;

/// What to do when a connection's outbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
  /// Discard the message for that connection only.
  #[default]
  Drop,
  /// Unregister the connection and close its queue.
  Close,
}

#[derive(Debug, Error)]
pub enum HubError {
  #[error("relay hub is not running")]
  Closed,
}

enum Command {
  Connect {
    id:        ConnectionId,
    handshake: Handshake,
    outbox:    mpsc::Sender<Outbound>,
  },
  Submit {
    id:      ConnectionId,
    message: ClientMessage,
  },
  Reject {
    id:    ConnectionId,
    error: floorsync_core::Error,
  },
  Disconnect {
    id: ConnectionId,
  },
  BridgeStatus {
    update: StatusUpdate,
  },
  ClientCount {
    respond_to: oneshot::Sender<usize>,
  },
  Snapshot {
    respond_to: oneshot::Sender<Snapshot>,
  },
}

// ─── Server half ─────────────────────────────────────────────────────────────

pub struct Hub {
  receiver:  mpsc::Receiver<Command>,
  state:     RelayState,
  outboxes:  HashMap<ConnectionId, mpsc::Sender<Outbound>>,
  policy:    OverflowPolicy,
  auto_join: bool,
}

impl Hub {
  /// Create the hub and a handle to reach it. The hub does nothing until
  /// [`Hub::run`] is spawned.
  pub fn new(config: &RelayConfig) -> (Self, HubHandle) {
    let (sender, receiver) = mpsc::channel(config.command_buffer.max(1));
    let hub = Self {
      receiver,
      state: RelayState::new(),
      outboxes: HashMap::new(),
      policy: config.overflow_policy,
      auto_join: config.auto_join,
    };
    let handle = HubHandle {
      sender,
      outbound_queue: config.outbound_queue.max(1),
    };
    (hub, handle)
  }

  /// Process commands until every [`HubHandle`] has been dropped.
  pub async fn run(mut self) {
    info!(policy = ?self.policy, auto_join = self.auto_join, "relay hub started");

    while let Some(command) = self.receiver.recv().await {
      match command {
        Command::Connect { id, handshake, outbox } => {
          if self.state.connect(id, &handshake) {
            self.outboxes.insert(id, outbox);
            if self.auto_join && joins_room(&handshake) {
              let join = ClientMessage::JoinRoom(JoinRequest {
                role: handshake.role.clone(),
                team: handshake.team.clone(),
              });
              let out = self.state.handle(id, join, Utc::now());
              self.deliver(out);
            }
          }
        }
        Command::Submit { id, message } => {
          let out = self.state.handle(id, message, Utc::now());
          self.deliver(out);
        }
        Command::Reject { id, error } => {
          let out = self.state.reject(id, &error);
          self.deliver(out);
        }
        Command::Disconnect { id } => {
          self.outboxes.remove(&id);
          self.state.disconnect(id);
        }
        Command::BridgeStatus { update } => {
          let out = self.state.relay_status(update);
          self.deliver(out);
        }
        Command::ClientCount { respond_to } => {
          let _ = respond_to.send(self.state.registry().count());
        }
        Command::Snapshot { respond_to } => {
          let _ = respond_to.send(self.state.snapshot());
        }
      }
    }

    info!(clients = self.state.registry().count(), "relay hub stopped");
  }

  fn deliver(&mut self, dispatches: Vec<Dispatch>) {
    for Dispatch { recipients, messages } in dispatches {
      if messages.is_empty() {
        continue;
      }
      let event = messages[0].event();
      let batch: Outbound = Arc::from(messages);
      for id in recipients {
        let Some(outbox) = self.outboxes.get(&id) else {
          continue;
        };
        match outbox.try_send(Arc::clone(&batch)) {
          Ok(()) => {}
          Err(mpsc::error::TrySendError::Full(_)) => match self.policy {
            OverflowPolicy::Drop => {
              warn!(connection_id = %id, event, messages = batch.len(), "outbound queue full, message dropped");
            }
            OverflowPolicy::Close => {
              warn!(connection_id = %id, event, messages = batch.len(), "outbound queue full, closing connection");
              self.evict(id);
            }
          },
          Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(connection_id = %id, "outbound queue closed");
            self.evict(id);
          }
        }
      }
    }
  }

  fn evict(&mut self, id: ConnectionId) {
    self.outboxes.remove(&id);
    self.state.disconnect(id);
  }
}

/// Whether a handshake names an identity that maps to a room. Anything else
/// waits for an explicit `joinRoom`.
fn joins_room(handshake: &Handshake) -> bool {
  let role = handshake.role.as_deref().and_then(Role::parse);
  Room::for_identity(role, handshake.team.as_deref()).is_some()
}

// ─── Client half ─────────────────────────────────────────────────────────────

/// Cheap, cloneable handle to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
  sender:         mpsc::Sender<Command>,
  outbound_queue: usize,
}

impl HubHandle {
  async fn send(&self, command: Command) -> Result<(), HubError> {
    self.sender.send(command).await.map_err(|_| HubError::Closed)
  }

  /// Register a new connection and return its id together with the
  /// receiving end of its outbound queue.
  pub async fn connect(
    &self,
    handshake: Handshake,
  ) -> Result<(ConnectionId, mpsc::Receiver<Outbound>), HubError> {
    let id = ConnectionId::new();
    let (outbox, outbound) = mpsc::channel(self.outbound_queue);
    self.send(Command::Connect { id, handshake, outbox }).await?;
    Ok((id, outbound))
  }

  pub async fn submit(
    &self,
    id: ConnectionId,
    message: ClientMessage,
  ) -> Result<(), HubError> {
    self.send(Command::Submit { id, message }).await
  }

  /// Report an undecodable frame back to the connection that sent it.
  pub async fn reject(
    &self,
    id: ConnectionId,
    error: floorsync_core::Error,
  ) -> Result<(), HubError> {
    self.send(Command::Reject { id, error }).await
  }

  pub async fn disconnect(&self, id: ConnectionId) -> Result<(), HubError> {
    self.send(Command::Disconnect { id }).await
  }

  pub async fn bridge_status(&self, update: StatusUpdate) -> Result<(), HubError> {
    self.send(Command::BridgeStatus { update }).await
  }

  pub async fn client_count(&self) -> Result<usize, HubError> {
    let (respond_to, response) = oneshot::channel();
    self.send(Command::ClientCount { respond_to }).await?;
    response.await.map_err(|_| HubError::Closed)
  }

  pub async fn snapshot(&self) -> Result<Snapshot, HubError> {
    let (respond_to, response) = oneshot::channel();
    self.send(Command::Snapshot { respond_to }).await?;
    response.await.map_err(|_| HubError::Closed)
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use floorsync_core::protocol::QuantityPayload;
  use tokio::time::timeout;

  use super::*;

  fn spawn(config: RelayConfig) -> HubHandle {
    let (hub, handle) = Hub::new(&config);
    tokio::spawn(hub.run());
    handle
  }

  fn join(role: &str, team: Option<&str>) -> ClientMessage {
    ClientMessage::JoinRoom(JoinRequest {
      role: Some(role.to_string()),
      team: team.map(str::to_string),
    })
  }

  fn quantity_for(item: &str, qty: i64) -> ClientMessage {
    ClientMessage::UpdateOrderQuantity(QuantityPayload {
      order_id: Some("O1".into()),
      item_id:  Some(item.into()),
      quantity: Some(qty),
      team:     Some("glass".into()),
    })
  }

  fn quantity(qty: i64) -> ClientMessage { quantity_for("I1", qty) }

  fn handshake(role: Option<&str>, team: Option<&str>) -> Handshake {
    Handshake {
      client_id: Some("line-2".into()),
      role:      role.map(str::to_string),
      team:      team.map(str::to_string),
    }
  }

  /// Events of the next queued batch, in order.
  async fn next_batch(rx: &mut mpsc::Receiver<Outbound>) -> Vec<&'static str> {
    timeout(Duration::from_secs(1), rx.recv())
      .await
      .expect("timed out waiting for message")
      .expect("queue closed")
      .iter()
      .map(ServerMessage::event)
      .collect()
  }

  #[tokio::test]
  async fn fans_out_through_handles() {
    let hub = spawn(RelayConfig::default());
    let (a, mut a_rx) = hub.connect(Handshake::default()).await.unwrap();
    let (b, mut b_rx) = hub.connect(Handshake::default()).await.unwrap();

    hub.submit(a, join("dispatcher", None)).await.unwrap();
    hub.submit(b, join("team", Some("glass"))).await.unwrap();
    hub.submit(b, quantity(5)).await.unwrap();

    assert_eq!(next_batch(&mut a_rx).await, vec!["roomJoined"]);
    assert_eq!(next_batch(&mut a_rx).await, vec!["orderQuantityUpdate"]);
    assert_eq!(next_batch(&mut b_rx).await, vec!["roomJoined"]);
    assert_eq!(next_batch(&mut b_rx).await, vec!["orderQuantityUpdate"]);
    assert_eq!(next_batch(&mut b_rx).await, vec!["updateConfirmation"]);

    let snapshot = hub.snapshot().await.unwrap();
    assert_eq!(snapshot.quantities[0].quantity, 5);
    assert_eq!(hub.client_count().await.unwrap(), 2);

    hub.disconnect(a).await.unwrap();
    assert_eq!(hub.client_count().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn replay_larger_than_queue_arrives_complete() {
    let hub = spawn(RelayConfig { outbound_queue: 4, ..RelayConfig::default() });
    let (team, mut team_rx) = hub.connect(Handshake::default()).await.unwrap();
    for n in 0..10 {
      hub.submit(team, quantity_for(&format!("I{n}"), n)).await.unwrap();
      assert_eq!(next_batch(&mut team_rx).await, vec!["updateConfirmation"]);
    }

    let (dispatcher, mut dispatcher_rx) = hub.connect(Handshake::default()).await.unwrap();
    hub.submit(dispatcher, join("dispatcher", None)).await.unwrap();
    // The replay takes one slot, so live traffic still fits behind it.
    hub.submit(team, quantity(42)).await.unwrap();
    assert_eq!(hub.client_count().await.unwrap(), 2);

    let events = next_batch(&mut dispatcher_rx).await;
    assert_eq!(events.len(), 11);
    assert_eq!(events[0], "roomJoined");
    assert!(events[1..].iter().all(|e| *e == "orderQuantityUpdate"));
    assert_eq!(next_batch(&mut dispatcher_rx).await, vec!["orderQuantityUpdate"]);
  }

  #[tokio::test]
  async fn full_queue_drops_message_but_keeps_connection() {
    let hub = spawn(RelayConfig { outbound_queue: 1, ..RelayConfig::default() });
    let (slow, mut slow_rx) = hub.connect(Handshake::default()).await.unwrap();
    let (sender, mut sender_rx) = hub.connect(Handshake::default()).await.unwrap();

    // `slow` never drains its roomJoined, so the fan-out overflows for it.
    hub.submit(slow, join("dispatcher", None)).await.unwrap();
    hub.submit(sender, quantity(5)).await.unwrap();

    assert_eq!(next_batch(&mut sender_rx).await, vec!["updateConfirmation"]);
    assert_eq!(hub.client_count().await.unwrap(), 2);

    assert_eq!(next_batch(&mut slow_rx).await, vec!["roomJoined"]);
    assert!(slow_rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn full_queue_closes_connection_under_close_policy() {
    let hub = spawn(RelayConfig {
      outbound_queue: 1,
      overflow_policy: OverflowPolicy::Close,
      ..RelayConfig::default()
    });
    let (slow, mut slow_rx) = hub.connect(Handshake::default()).await.unwrap();
    let (sender, mut sender_rx) = hub.connect(Handshake::default()).await.unwrap();

    hub.submit(slow, join("dispatcher", None)).await.unwrap();
    hub.submit(sender, quantity(5)).await.unwrap();

    assert_eq!(next_batch(&mut sender_rx).await, vec!["updateConfirmation"]);
    assert_eq!(hub.client_count().await.unwrap(), 1);

    // The queued message is still readable, then the queue reports closed.
    assert_eq!(next_batch(&mut slow_rx).await, vec!["roomJoined"]);
    assert!(slow_rx.recv().await.is_none());

    // Late frames from the evicted connection are ignored.
    hub.submit(slow, quantity(9)).await.unwrap();
    assert_eq!(hub.snapshot().await.unwrap().quantities[0].quantity, 5);
  }

  #[tokio::test]
  async fn auto_join_uses_handshake_identity() {
    let hub = spawn(RelayConfig { auto_join: true, ..RelayConfig::default() });
    let (_, mut rx) = hub.connect(handshake(Some("team"), Some("caps"))).await.unwrap();

    let batch = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    let [ServerMessage::RoomJoined(joined)] = &*batch else {
      panic!("expected roomJoined, got {batch:?}");
    };
    assert_eq!(joined.room.as_ref().map(ToString::to_string).as_deref(), Some("team-caps"));
  }

  #[tokio::test]
  async fn auto_join_skips_handshakes_without_a_room() {
    let hub = spawn(RelayConfig { auto_join: true, ..RelayConfig::default() });
    let unroutable = [
      handshake(Some("bogus"), None),
      handshake(Some(""), None),
      handshake(Some("team"), None),
      handshake(Some("team"), Some("")),
      handshake(None, Some("caps")),
    ];
    let mut queues = Vec::new();
    for identity in unroutable {
      let (_, rx) = hub.connect(identity).await.unwrap();
      queues.push(rx);
    }

    // Commands apply in order, so every connect has been handled by now.
    assert_eq!(hub.client_count().await.unwrap(), 5);
    for rx in &mut queues {
      assert!(rx.try_recv().is_err(), "unsolicited message on connect");
    }
  }

  #[tokio::test]
  async fn dropped_receiver_is_cleaned_up_on_next_delivery() {
    let hub = spawn(RelayConfig::default());
    let (gone, gone_rx) = hub.connect(Handshake::default()).await.unwrap();
    let (team, mut team_rx) = hub.connect(Handshake::default()).await.unwrap();
    hub.submit(gone, join("dispatcher", None)).await.unwrap();
    drop(gone_rx);

    hub.submit(team, quantity(1)).await.unwrap();
    assert_eq!(next_batch(&mut team_rx).await, vec!["updateConfirmation"]);
    assert_eq!(hub.client_count().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn handle_errors_once_hub_is_gone() {
    let (hub, handle) = Hub::new(&RelayConfig::default());
    drop(hub);
    assert!(matches!(handle.client_count().await, Err(HubError::Closed)));
  }
}
