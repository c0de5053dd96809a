//! WebSocket transport: one reader loop and one writer task per connection.
//!
//! The writer owns the socket sink and drains the connection's outbound
//! queue, writing each queued batch as consecutive text frames; the reader
//! decodes text frames and hands them to the hub. When either side ends,
//! the connection is unregistered.

use std::time::Duration;

use axum::{
  extract::{
    Query, State,
    ws::{Message, WebSocket, WebSocketUpgrade},
  },
  response::Response,
};
use floorsync_core::{
  ConnectionId, Handshake,
  protocol::{ClientMessage, ServerMessage},
};
use futures_util::{
  SinkExt, StreamExt,
  stream::{SplitSink, SplitStream},
};
use tokio::{sync::mpsc, time::interval};

use crate::{AppState, hub::{HubHandle, Outbound}};

/// `GET /ws?clientId=..&role=..&team=..`
pub async fn upgrade(
  State(state): State<AppState>,
  Query(handshake): Query<Handshake>,
  ws: WebSocketUpgrade,
) -> Response {
  ws.on_upgrade(move |socket| run_connection(socket, state, handshake))
}

async fn run_connection(socket: WebSocket, state: AppState, handshake: Handshake) {
  let client_id = handshake.client_id.clone().unwrap_or_default();
  let (id, outbound) = match state.hub.connect(handshake).await {
    Ok(connection) => connection,
    Err(e) => {
      tracing::error!(client_id = %client_id, error = %e, "cannot register connection");
      return;
    }
  };
  tracing::info!(connection_id = %id, client_id = %client_id, "websocket opened");

  let (sink, stream) = socket.split();
  let ping_every = match state.config.ping_interval_secs {
    0 => None,
    secs => Some(Duration::from_secs(secs)),
  };
  let mut writer = tokio::spawn(writer_task(sink, outbound, ping_every));

  tokio::select! {
    _ = reader_loop(stream, &state.hub, id) => {}
    _ = &mut writer => {
      tracing::debug!(connection_id = %id, "writer finished first");
    }
  }

  writer.abort();
  let _ = state.hub.disconnect(id).await;
  tracing::info!(connection_id = %id, client_id = %client_id, "websocket closed");
}

async fn reader_loop(mut stream: SplitStream<WebSocket>, hub: &HubHandle, id: ConnectionId) {
  while let Some(frame) = stream.next().await {
    let forwarded = match frame {
      Ok(Message::Text(text)) => match ClientMessage::from_json(text.as_str()) {
        Ok(message) => hub.submit(id, message).await,
        Err(e) => {
          tracing::debug!(connection_id = %id, error = %e, "undecodable frame");
          hub.reject(id, e).await
        }
      },
      Ok(Message::Binary(_)) => {
        tracing::debug!(connection_id = %id, "ignoring binary frame");
        Ok(())
      }
      Ok(Message::Close(frame)) => {
        tracing::debug!(connection_id = %id, reason = ?frame, "client initiated close");
        return;
      }
      Ok(_) => Ok(()),
      Err(e) => {
        tracing::warn!(connection_id = %id, error = %e, "websocket receive error");
        return;
      }
    };
    if forwarded.is_err() {
      return;
    }
  }
}

async fn writer_task(
  mut sink: SplitSink<WebSocket, Message>,
  mut outbound: mpsc::Receiver<Outbound>,
  ping_every: Option<Duration>,
) {
  let mut ticker = ping_every.map(|period| {
    let mut ticker = interval(period);
    ticker.reset();
    ticker
  });

  loop {
    let ping = async {
      match ticker.as_mut() {
        Some(ticker) => {
          ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
      }
    };

    let frames = tokio::select! {
      next = outbound.recv() => match next {
        Some(batch) => encode(&batch),
        None => {
          // Queue closed by the hub: evicted or shutting down.
          let _ = sink.send(Message::Close(None)).await;
          return;
        }
      },
      _ = ping => vec![Message::Ping(Default::default())],
    };

    for frame in frames {
      if sink.feed(frame).await.is_err() {
        return;
      }
    }
    if sink.flush().await.is_err() {
      return;
    }
  }
}

/// One text frame per message of a queued batch, in order.
fn encode(batch: &[ServerMessage]) -> Vec<Message> {
  batch
    .iter()
    .filter_map(|message| match message.to_json() {
      Ok(text) => Some(Message::Text(text.into())),
      Err(e) => {
        tracing::error!(event = message.event(), error = %e, "cannot encode message");
        None
      }
    })
    .collect()
}
