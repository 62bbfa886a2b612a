use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Result};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Error;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::{IntervalStream, UnboundedReceiverStream};
use tracing::{debug, error, info, instrument};

use crate::room::RoomId;
use crate::server::state::ServerState;
use crate::session::{ClientEvent, ConnectionId, ServerEvent, SessionError, Sessions};

pub(crate) async fn socket(
  ws: WebSocketUpgrade,
  State(state): State<ServerState>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
  ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

#[instrument(name = "socket", skip_all, fields(addr = addr.to_string()))]
async fn handle_socket(socket: WebSocket, state: ServerState, addr: SocketAddr) {
  let (ws_sender, ws_receiver) = socket.split();
  let (sender, receiver) = mpsc::unbounded_channel();
  let connection_id = state.sessions.add_connection(sender.clone());
  info!("{connection_id} connected");

  tokio::select! {
    _ = handle_channel(receiver, ws_sender) => {},
    _ = handle_heartbeats(connection_id, sender, state.heartbeat, state.sessions.clone()) => {},
    _ = handle_messages(connection_id, ws_receiver, state.sessions.clone()) => {},
  }

  // Runs the leave path for whatever room the connection was in.
  if let Err(e) = state.sessions.remove_connection(connection_id) {
    error!("{e}");
  }
}

async fn handle_channel(
  receiver: UnboundedReceiver<Result<Message, Error>>,
  ws_sender: SplitSink<WebSocket, Message>,
) -> Result<()> {
  UnboundedReceiverStream::new(receiver).forward(ws_sender).await.map_err(Into::into)
}

#[instrument(name = "heartbeat", skip_all, fields(connection = connection_id.to_string()))]
async fn handle_heartbeats(
  connection_id: ConnectionId,
  sender: UnboundedSender<Result<Message, Error>>,
  interval: Duration,
  sessions: Sessions,
) -> Result<()> {
  let mut stream = IntervalStream::new(tokio::time::interval(interval));
  while stream.next().await.is_some() {
    if sessions.is_alive(connection_id) {
      debug!("send ping");
      sessions.set_alive(connection_id, false)?;
      sender.send(Ok(Message::Ping("".into())))?;
    } else {
      info!("connection timeout");
      break;
    }
  }
  Ok(())
}

#[instrument(name = "message", skip_all, fields(connection = connection_id.to_string()))]
async fn handle_messages(
  connection_id: ConnectionId,
  mut ws_receiver: SplitStream<WebSocket>,
  sessions: Sessions,
) {
  while let Some(Ok(message)) = ws_receiver.next().await {
    if let Message::Close(_) = message {
      info!("disconnected");
      break;
    }

    // A failing event never takes down the socket or another room.
    if let Err(e) = handle_message(message, connection_id, &sessions) {
      error!("{e}")
    }
  }
}

fn handle_message(message: Message, connection_id: ConnectionId, sessions: &Sessions) -> Result<()> {
  match message {
    Message::Text(payload) => handle_event(payload, connection_id, sessions),
    Message::Binary(_) => bail!("unsupported binary message"),
    Message::Pong(_) => {
      debug!("recv pong");
      sessions.set_alive(connection_id, true).map_err(Into::into)
    }
    // axum answers client pings on its own; close frames end the loop
    // before reaching here.
    other => {
      debug!("ignoring frame {other:?}");
      Ok(())
    }
  }
}

fn handle_event(payload: String, connection_id: ConnectionId, sessions: &Sessions) -> Result<()> {
  let event: ClientEvent = payload.parse()?;
  info!("recv event event={event}");

  match dispatch(event, connection_id, sessions) {
    // Lifecycle errors go back to the caller instead of the log: the
    // creator must learn its room id is taken, the joiner that the room
    // is gone.
    Err(SessionError::RoomNotFound) => {
      sessions.send(connection_id, &ServerEvent::ErrorRoomNotFound).map_err(Into::into)
    }
    Err(SessionError::RoomAlreadyExists) => {
      sessions.send(connection_id, &ServerEvent::ErrorRoomExists).map_err(Into::into)
    }
    other => other.map_err(Into::into),
  }
}

fn dispatch(
  event: ClientEvent,
  connection_id: ConnectionId,
  sessions: &Sessions,
) -> Result<(), SessionError> {
  match event {
    ClientEvent::CreateRoom { room_id, username } => {
      sessions.create_room(connection_id, RoomId::new(&room_id), &username)
    }
    ClientEvent::JoinRoom { room_id, username } => {
      sessions.join_room(connection_id, RoomId::new(&room_id), &username)
    }
    ClientEvent::LeaveRoom { room_id } => {
      sessions.leave_room(connection_id, &RoomId::new(&room_id))
    }
    ClientEvent::DeleteRoom { room_id } => sessions.delete_room(&RoomId::new(&room_id)),
    ClientEvent::ChangeVideo { room_id, url } => {
      sessions.change_video(connection_id, &RoomId::new(&room_id), &url)
    }
    ClientEvent::VideoState { room_id, event } => {
      sessions.playback_event(connection_id, &RoomId::new(&room_id), event)
    }
    ClientEvent::SendMessage { room_id, author, text } => {
      sessions.send_message(&RoomId::new(&room_id), &author, &text)
    }
    ClientEvent::Signal { to, payload } => {
      sessions.relay_signal(connection_id, to, payload);
      Ok(())
    }
    ClientEvent::ToggleMute { room_id, is_muted } => {
      sessions.toggle_mute(connection_id, &RoomId::new(&room_id), is_muted)
    }
  }
}
