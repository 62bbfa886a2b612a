mod media;
mod peer;
mod playback;

use std::collections::HashSet;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

pub use self::media::{acquire_or_muted, CaptureDevice, CaptureError, LocalMedia, RemoteStream};
pub use self::peer::{NegotiationError, PeerFactory, PeerLink, PeerRegistry, PeerRole, PeerTransport};
pub use self::playback::{EchoGuard, PlaybackController, Player};

use crate::room::{ChatMessage, Membership, PlaybackKind};
use crate::session::{ClientEvent, ConnectionId, ServerEvent};

/// Whether this client creates the room or joins an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomMode {
  Create,
  Join,
}

/// Terminal lifecycle failures the server reports back. Stored, not
/// swallowed: the UI redirects home on either.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomFailure {
  NotFound,
  AlreadyExists,
}

/// Client-local peer connection orchestrator. Reacts to server events for
/// one room: builds and tears down the media mesh, mirrors the roster,
/// keeps the local player in sync. Everything it sends goes through the
/// injected connection context, never a global.
pub struct Orchestrator {
  room_id: String,
  username: String,
  mode: RoomMode,
  self_id: Option<ConnectionId>,
  local: Option<Box<dyn LocalMedia>>,
  muted: bool,
  factory: Box<dyn PeerFactory>,
  registry: PeerRegistry,
  playback: PlaybackController,
  outbound: UnboundedSender<ClientEvent>,
  owner: Option<String>,
  roster: Vec<Membership>,
  messages: Vec<ChatMessage>,
  failure: Option<RoomFailure>,
  ended: bool,
}

impl Orchestrator {
  /// The caller resolves the capture grant first; passing `local = None`
  /// means capture was denied and this client joins muted, video-only.
  pub fn new(
    room_id: impl Into<String>,
    username: impl Into<String>,
    mode: RoomMode,
    local: Option<Box<dyn LocalMedia>>,
    factory: Box<dyn PeerFactory>,
    player: Box<dyn Player>,
    outbound: UnboundedSender<ClientEvent>,
  ) -> Self {
    Self {
      room_id: room_id.into(),
      username: username.into(),
      mode,
      self_id: None,
      local,
      muted: true,
      factory,
      registry: PeerRegistry::new(),
      playback: PlaybackController::new(player),
      outbound,
      owner: None,
      roster: Vec::new(),
      messages: Vec::new(),
      failure: None,
      ended: false,
    }
  }

  pub fn handle_event(&mut self, event: ServerEvent) {
    match event {
      ServerEvent::Connected { connection_id } => {
        self.self_id = Some(connection_id);
        let event = match self.mode {
          RoomMode::Create => ClientEvent::CreateRoom {
            room_id: self.room_id.clone(),
            username: self.username.clone(),
          },
          RoomMode::Join => ClientEvent::JoinRoom {
            room_id: self.room_id.clone(),
            username: self.username.clone(),
          },
        };
        self.emit(event);
      }
      ServerEvent::RoomSync { owner, users, messages, video_state } => {
        self.owner = Some(owner);
        self.messages = messages;
        self.playback.apply_snapshot(&video_state);
        self.initiate_links(&users);
        self.roster = users;
      }
      ServerEvent::AllUsers { users } => self.reconcile(users),
      ServerEvent::UserConnected { username, .. } => {
        self.push_notice(format!("{username} joined"));
      }
      ServerEvent::UserDisconnected { connection_id } => {
        if let Some(mut link) = self.registry.remove(connection_id) {
          link.close();
          let name = link.remote_username.as_deref().unwrap_or("someone");
          let notice = format!("{name} left");
          self.push_notice(notice);
        }
      }
      ServerEvent::RoomEnded => {
        info!("room ended by owner");
        self.ended = true;
        self.shutdown();
      }
      ServerEvent::ErrorRoomNotFound => self.failure = Some(RoomFailure::NotFound),
      ServerEvent::ErrorRoomExists => self.failure = Some(RoomFailure::AlreadyExists),
      ServerEvent::ChangeVideo { url } => self.playback.apply_change_video(&url),
      ServerEvent::VideoState { event } => self.playback.apply_remote(&event),
      ServerEvent::ReceiveMessage { message } => self.messages.push(message),
      ServerEvent::Signal { from, payload } => self.handle_signal(from, payload),
    }
  }

  /// The joiner initiates toward every member already present. The member
  /// already in the room never initiates toward a newcomer, so no pair can
  /// race into zero or two links.
  fn initiate_links(&mut self, users: &[Membership]) {
    for user in users {
      if Some(user.connection_id) == self.self_id || self.registry.contains(user.connection_id) {
        continue;
      }

      let transport = match self.factory.create(PeerRole::Initiator, self.local.as_deref()) {
        Ok(transport) => transport,
        Err(e) => {
          warn!("link to {} failed: {e}", user.connection_id);
          continue;
        }
      };

      let mut link = PeerLink::new(user.connection_id, PeerRole::Initiator, transport);
      link.remote_username = Some(user.username.clone());
      link.remote_muted = user.is_muted;

      let payloads = match link.start() {
        Ok(payloads) => payloads,
        Err(e) => {
          warn!("link to {} failed: {e}", user.connection_id);
          link.close();
          continue;
        }
      };

      if let Err(mut rejected) = self.registry.insert_if_absent(link) {
        warn!("duplicate link for {} rejected", rejected.peer_id);
        rejected.close();
        continue;
      }
      for payload in payloads {
        self.emit(ClientEvent::Signal { to: user.connection_id, payload });
      }
    }
  }

  /// Roster refresh: drop links whose peer is gone, refresh metadata on
  /// the rest. New ids are left alone until they initiate toward us.
  fn reconcile(&mut self, users: Vec<Membership>) {
    let present: HashSet<ConnectionId> = users.iter().map(|u| u.connection_id).collect();

    for peer_id in self.registry.peer_ids() {
      if !present.contains(&peer_id) {
        if let Some(mut link) = self.registry.remove(peer_id) {
          link.close();
        }
      }
    }

    for user in &users {
      if let Some(link) = self.registry.get_mut(user.connection_id) {
        link.remote_username = Some(user.username.clone());
        link.remote_muted = user.is_muted;
      }
    }

    self.roster = users;
  }

  /// A payload from an unknown peer means that peer initiated: respond,
  /// feeding the payload in before anything else. A payload from a known
  /// peer advances its negotiation.
  fn handle_signal(&mut self, from: ConnectionId, payload: Value) {
    if self.registry.contains(from) {
      let result = self.registry.get_mut(from).map(|link| link.apply_signal(payload));
      match result {
        Some(Ok(replies)) => {
          for payload in replies {
            self.emit(ClientEvent::Signal { to: from, payload });
          }
        }
        Some(Err(e)) => self.drop_link(from, &e),
        None => {}
      }
      return;
    }

    let transport = match self.factory.create(PeerRole::Responder, self.local.as_deref()) {
      Ok(transport) => transport,
      Err(e) => {
        warn!("link to {from} failed: {e}");
        return;
      }
    };

    let mut link = PeerLink::new(from, PeerRole::Responder, transport);
    if let Some(user) = self.roster.iter().find(|u| u.connection_id == from) {
      link.remote_username = Some(user.username.clone());
      link.remote_muted = user.is_muted;
    }

    match link.apply_signal(payload) {
      Ok(replies) => {
        if let Err(mut rejected) = self.registry.insert_if_absent(link) {
          warn!("duplicate link for {} rejected", rejected.peer_id);
          rejected.close();
          return;
        }
        for payload in replies {
          self.emit(ClientEvent::Signal { to: from, payload });
        }
      }
      Err(e) => {
        warn!("link to {from} failed: {e}");
        link.close();
      }
    }
  }

  /// A single link's negotiation failure degrades that link only.
  fn drop_link(&mut self, peer_id: ConnectionId, error: &NegotiationError) {
    warn!("link to {peer_id} failed: {error}");
    if let Some(mut link) = self.registry.remove(peer_id) {
      link.close();
    }
  }

  // Local actions, called by whatever drives this client.

  pub fn send_chat(&self, text: impl Into<String>) {
    self.emit(ClientEvent::SendMessage {
      room_id: self.room_id.clone(),
      author: self.username.clone(),
      text: text.into(),
    });
  }

  pub fn set_video(&mut self, url: &str) {
    self.emit(ClientEvent::ChangeVideo { room_id: self.room_id.clone(), url: url.to_owned() });
    self.playback.apply_change_video(url);
  }

  /// Reports a local player change, unless it is the echo of a remote one.
  pub fn player_changed(&mut self, kind: PlaybackKind, playing: bool) {
    if let Some(event) = self.playback.local_event(kind, playing) {
      self.emit(ClientEvent::VideoState { room_id: self.room_id.clone(), event });
    }
  }

  pub fn toggle_mute(&mut self) -> bool {
    self.muted = !self.muted;
    if let Some(local) = self.local.as_mut() {
      local.set_enabled(!self.muted);
    }
    self.emit(ClientEvent::ToggleMute { room_id: self.room_id.clone(), is_muted: self.muted });
    self.muted
  }

  pub fn delete_room(&self) {
    self.emit(ClientEvent::DeleteRoom { room_id: self.room_id.clone() });
  }

  /// Leaves the room. All links and the capture device are released
  /// synchronously, before the leave event goes out; completion never
  /// waits on a server acknowledgment.
  pub fn leave(&mut self) {
    self.shutdown();
    self.emit(ClientEvent::LeaveRoom { room_id: self.room_id.clone() });
  }

  fn shutdown(&mut self) {
    for mut link in self.registry.drain() {
      link.close();
    }
    if let Some(local) = self.local.as_mut() {
      local.stop();
    }
  }

  fn push_notice(&mut self, text: String) {
    self.messages.push(ChatMessage { author: "System".into(), text, timestamp: Utc::now() });
  }

  fn emit(&self, event: ClientEvent) {
    if self.outbound.send(event).is_err() {
      debug!("connection closed; event dropped");
    }
  }

  // Read-side accessors for the embedding UI.

  pub fn self_id(&self) -> Option<ConnectionId> {
    self.self_id
  }

  pub fn owner(&self) -> Option<&str> {
    self.owner.as_deref()
  }

  pub fn roster(&self) -> &[Membership] {
    &self.roster
  }

  pub fn messages(&self) -> &[ChatMessage] {
    &self.messages
  }

  pub fn peers(&self) -> &PeerRegistry {
    &self.registry
  }

  pub fn is_muted(&self) -> bool {
    self.muted
  }

  pub fn failure(&self) -> Option<RoomFailure> {
    self.failure
  }

  pub fn is_ended(&self) -> bool {
    self.ended
  }
}
