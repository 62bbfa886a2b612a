mod connection;
mod error;
mod event;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

pub use self::connection::{Connection, ConnectionId, ConnectionSender};
pub use self::error::SessionError;
pub use self::event::{ClientEvent, ServerEvent};

use crate::room::{ChatMessage, PlaybackEvent, PlaybackState, Room, RoomId, RoomStore, StoreError};

/// Server core: the live connection registry plus every room operation.
/// One instance owns all rooms this process serves; handlers clone it
/// freely and share the maps behind `Arc<RwLock>`.
#[derive(Clone)]
pub struct Sessions {
  connections: Arc<RwLock<HashMap<ConnectionId, Arc<RwLock<Connection>>>>>,
  store: Arc<dyn RoomStore>,
}

impl Sessions {
  pub fn new(store: Arc<dyn RoomStore>) -> Self {
    Self { connections: Default::default(), store }
  }

  pub fn connections(&self) -> Vec<Arc<RwLock<Connection>>> {
    self.connections.read_arc().values().cloned().collect()
  }

  pub fn room_ids(&self) -> Result<Vec<RoomId>, SessionError> {
    Ok(self.store.room_ids()?)
  }

  /// Registers a fresh transport session and tells the client its id.
  pub fn add_connection(&self, sender: ConnectionSender) -> ConnectionId {
    let connection_id = ConnectionId::new();
    debug!("add connection");

    let connection = Arc::new(RwLock::new(Connection::new(connection_id, sender)));
    self.connections.write_arc().insert(connection_id, connection);

    if let Err(e) = self.send(connection_id, &ServerEvent::Connected { connection_id }) {
      debug!("welcome dropped: {e}");
    }
    connection_id
  }

  /// Unregisters a transport session, running the leave path for whatever
  /// room it was in. Socket teardown and explicit leave-room converge here.
  pub fn remove_connection(&self, connection_id: ConnectionId) -> Result<(), SessionError> {
    debug!("remove connection");

    let connection = self
      .connections
      .write_arc()
      .remove(&connection_id)
      .ok_or(SessionError::UnknownConnection(connection_id))?;

    let room_id = connection.read_arc().room.clone();
    if let Some(room_id) = room_id {
      self.depart(connection_id, &room_id)?;
    }
    Ok(())
  }

  pub fn set_alive(&self, connection_id: ConnectionId, is_alive: bool) -> Result<(), SessionError> {
    self
      .connections
      .read_arc()
      .get(&connection_id)
      .ok_or(SessionError::UnknownConnection(connection_id))?
      .write_arc()
      .is_alive = is_alive;
    Ok(())
  }

  pub fn is_alive(&self, connection_id: ConnectionId) -> bool {
    self
      .connections
      .read_arc()
      .get(&connection_id)
      .map(|c| c.read_arc().is_alive)
      .unwrap_or(false)
  }

  /// Creates a room with the caller as owner and sole member. The store's
  /// insert-if-absent guarantee makes the duplicate-create race lose
  /// cleanly: the loser gets `RoomAlreadyExists`, never an overwrite.
  pub fn create_room(
    &self,
    connection_id: ConnectionId,
    room_id: RoomId,
    username: &str,
  ) -> Result<(), SessionError> {
    debug!("create room room_id={room_id}");

    let room = Room::new(room_id.clone(), username, connection_id);
    let snapshot = room.clone();
    self.store.insert_if_absent(room).map_err(|e| match e {
      StoreError::AlreadyExists => SessionError::RoomAlreadyExists,
      other => SessionError::Store(other),
    })?;

    self.depart_previous(connection_id, &room_id)?;
    self.attach(connection_id, Some(room_id))?;

    let members = snapshot.member_ids();
    self.send(
      connection_id,
      &ServerEvent::RoomSync {
        owner: snapshot.owner.clone(),
        users: snapshot.users.clone(),
        messages: snapshot.messages,
        video_state: snapshot.video_state,
      },
    )?;
    self.broadcast(&members, None, &ServerEvent::AllUsers { users: snapshot.users });
    Ok(())
  }

  /// Joins an existing room. The snapshot sent back to the joiner is taken
  /// after its own roster entry is written, so the joiner sees itself in
  /// `users` exactly once.
  pub fn join_room(
    &self,
    connection_id: ConnectionId,
    room_id: RoomId,
    username: &str,
  ) -> Result<(), SessionError> {
    debug!("join room room_id={room_id}");

    let mut snapshot = None;
    let existed = self.store.update(&room_id, &mut |room| {
      room.upsert_member(username, connection_id);
      snapshot = Some(room.clone());
    })?;
    let Some(room) = snapshot.filter(|_| existed) else {
      return Err(SessionError::RoomNotFound);
    };

    self.depart_previous(connection_id, &room_id)?;
    self.attach(connection_id, Some(room_id))?;

    let members = room.member_ids();
    self.broadcast(
      &members,
      Some(connection_id),
      &ServerEvent::UserConnected { username: username.to_owned(), connection_id, is_muted: true },
    );
    self.send(
      connection_id,
      &ServerEvent::RoomSync {
        owner: room.owner.clone(),
        users: room.users.clone(),
        messages: room.messages,
        video_state: room.video_state,
      },
    )?;
    self.broadcast(&members, None, &ServerEvent::AllUsers { users: room.users });
    Ok(())
  }

  /// Explicit leave. Removing an id that is not on the roster is a no-op.
  pub fn leave_room(
    &self,
    connection_id: ConnectionId,
    room_id: &RoomId,
  ) -> Result<(), SessionError> {
    debug!("leave room room_id={room_id}");

    self.attach(connection_id, None)?;
    self.depart(connection_id, room_id)
  }

  /// Destroys the room. Ownership is checked by the caller's authorization
  /// layer, not here; the wire protocol is not a trust boundary.
  pub fn delete_room(&self, room_id: &RoomId) -> Result<(), SessionError> {
    debug!("delete room room_id={room_id}");

    let room = self.store.read(room_id)?.ok_or(SessionError::RoomNotFound)?;
    self.store.remove(room_id)?;

    for member in room.member_ids() {
      if let Err(e) = self.send(member, &ServerEvent::RoomEnded) {
        debug!("room-ended dropped: {e}");
      }
      // Force the member's session out of the broadcast group.
      let _ = self.attach(member, None);
    }
    Ok(())
  }

  /// Resets playback to the given url from position zero and tells every
  /// other member to do the same.
  pub fn change_video(
    &self,
    connection_id: ConnectionId,
    room_id: &RoomId,
    url: &str,
  ) -> Result<(), SessionError> {
    debug!("change video room_id={room_id} url={url}");

    let mut members = Vec::new();
    let existed = self.store.update(room_id, &mut |room| {
      room.video_state = PlaybackState::fresh(url, Utc::now());
      members = room.member_ids();
    })?;
    if !existed {
      return Err(SessionError::RoomNotFound);
    }

    self.broadcast(
      &members,
      Some(connection_id),
      &ServerEvent::ChangeVideo { url: url.to_owned() },
    );
    Ok(())
  }

  /// Stores a play/pause or seek event and relays it verbatim to the other
  /// members. Receivers apply the raw event, not a recomputed derivative.
  pub fn playback_event(
    &self,
    connection_id: ConnectionId,
    room_id: &RoomId,
    event: PlaybackEvent,
  ) -> Result<(), SessionError> {
    debug!("playback event room_id={room_id} kind={:?}", event.kind);

    let mut members = Vec::new();
    let existed = self.store.update(room_id, &mut |room| {
      room.video_state.apply(&event, Utc::now());
      members = room.member_ids();
    })?;
    if !existed {
      return Err(SessionError::RoomNotFound);
    }

    self.broadcast(&members, Some(connection_id), &ServerEvent::VideoState { event });
    Ok(())
  }

  /// Appends a chat message and broadcasts it to every member, sender
  /// included. Arrival order here is the canonical order.
  pub fn send_message(
    &self,
    room_id: &RoomId,
    author: &str,
    text: &str,
  ) -> Result<(), SessionError> {
    debug!("send message room_id={room_id}");

    let message =
      ChatMessage { author: author.to_owned(), text: text.to_owned(), timestamp: Utc::now() };
    let mut members = Vec::new();
    let existed = self.store.update(room_id, &mut |room| {
      room.messages.push(message.clone());
      members = room.member_ids();
    })?;
    if !existed {
      return Err(SessionError::RoomNotFound);
    }

    self.broadcast(&members, None, &ServerEvent::ReceiveMessage { message });
    Ok(())
  }

  /// Updates the caller's mute flag and rebroadcasts the roster so every
  /// member sees the new state.
  pub fn toggle_mute(
    &self,
    connection_id: ConnectionId,
    room_id: &RoomId,
    is_muted: bool,
  ) -> Result<(), SessionError> {
    debug!("toggle mute room_id={room_id} is_muted={is_muted}");

    let mut snapshot = None;
    self.store.update(room_id, &mut |room| {
      if room.set_muted(connection_id, is_muted) {
        snapshot = Some((room.member_ids(), room.users.clone()));
      }
    })?;

    if let Some((members, users)) = snapshot {
      self.broadcast(&members, None, &ServerEvent::AllUsers { users });
    }
    Ok(())
  }

  /// Unicast forward of an opaque negotiation payload. A target with no
  /// live session is a silent drop, not an error: the sender cannot tell
  /// delivered from dropped and must not block on it.
  pub fn relay_signal(&self, from: ConnectionId, to: ConnectionId, payload: Value) {
    if let Err(e) = self.send(to, &ServerEvent::Signal { from, payload }) {
      debug!("signal to {to} dropped: {e}");
    }
  }

  pub fn send(
    &self,
    connection_id: ConnectionId,
    event: &ServerEvent,
  ) -> Result<(), SessionError> {
    self
      .connections
      .read_arc()
      .get(&connection_id)
      .ok_or(SessionError::UnknownConnection(connection_id))?
      .read_arc()
      .sender
      .send(Ok(Message::Text(event.to_string())))
      .map_err(|_| SessionError::ConnectionClosed(connection_id))
  }

  fn broadcast(&self, members: &[ConnectionId], exclude: Option<ConnectionId>, event: &ServerEvent) {
    for member in members.iter().filter(|id| Some(**id) != exclude) {
      if let Err(e) = self.send(*member, event) {
        // Dead connections are routine; their own teardown cleans up.
        debug!("broadcast to {member} dropped: {e}");
      }
    }
  }

  fn attach(&self, connection_id: ConnectionId, room_id: Option<RoomId>) -> Result<(), SessionError> {
    self
      .connections
      .read_arc()
      .get(&connection_id)
      .ok_or(SessionError::UnknownConnection(connection_id))?
      .write_arc()
      .room = room_id;
    Ok(())
  }

  /// A connection switching rooms must leave the old roster first, or its
  /// entry would be stranded there until someone deletes the room.
  fn depart_previous(&self, connection_id: ConnectionId, next: &RoomId) -> Result<(), SessionError> {
    let previous = self
      .connections
      .read_arc()
      .get(&connection_id)
      .ok_or(SessionError::UnknownConnection(connection_id))?
      .read_arc()
      .room
      .clone();

    match previous {
      Some(previous) if previous != *next => self.depart(connection_id, &previous),
      _ => Ok(()),
    }
  }

  /// Shared tail of leave-room and socket teardown: pulls the entry for
  /// `connection_id` out of the roster and notifies whoever remains.
  fn depart(&self, connection_id: ConnectionId, room_id: &RoomId) -> Result<(), SessionError> {
    let mut snapshot = None;
    self.store.update(room_id, &mut |room| {
      if room.remove_member(connection_id) {
        snapshot = Some((room.member_ids(), room.users.clone()));
      }
    })?;

    if let Some((members, users)) = snapshot {
      self.broadcast(&members, None, &ServerEvent::UserDisconnected { connection_id });
      self.broadcast(&members, None, &ServerEvent::AllUsers { users });
    }
    Ok(())
  }
}
