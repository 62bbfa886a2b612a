use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::ConnectionId;

/// Caller-supplied room identifier. Case-sensitive, trimmed of surrounding
/// whitespace at construction.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
  pub fn new(raw: &str) -> Self {
    Self(raw.trim().to_owned())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for RoomId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// One participant's presence record within a room. `connection_id` changes
/// on every reconnect, `username` is the stable identity.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
  pub username: String,
  pub connection_id: ConnectionId,
  pub is_muted: bool,
  pub joined_at: DateTime<Utc>,
}

impl Membership {
  pub fn new(username: impl Into<String>, connection_id: ConnectionId) -> Self {
    Self { username: username.into(), connection_id, is_muted: true, joined_at: Utc::now() }
  }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatMessage {
  pub author: String,
  pub text: String,
  pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackKind {
  Playpause,
  Seek,
}

/// Incremental playback sync event, relayed verbatim between members.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct PlaybackEvent {
  pub kind: PlaybackKind,
  pub playing: bool,
  pub position: f64,
}

/// The room's authoritative shared playback tuple. `position` is the
/// position at `updated_at`, not the live position.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
  pub url: String,
  pub playing: bool,
  pub position: f64,
  pub updated_at: DateTime<Utc>,
}

impl PlaybackState {
  /// State for a freshly selected video: playing from the start.
  pub fn fresh(url: impl Into<String>, now: DateTime<Utc>) -> Self {
    Self { url: url.into(), playing: true, position: 0.0, updated_at: now }
  }

  /// Applies an incremental event. A seek always resumes playback; the
  /// event's own flag only matters for play/pause toggles.
  pub fn apply(&mut self, event: &PlaybackEvent, now: DateTime<Utc>) {
    self.playing = match event.kind {
      PlaybackKind::Playpause => event.playing,
      PlaybackKind::Seek => true,
    };
    self.position = event.position;
    self.updated_at = now;
  }

  /// Extrapolated position at `now` in seconds.
  pub fn live_position(&self, now: DateTime<Utc>) -> f64 {
    if self.playing {
      let elapsed = (now - self.updated_at).num_milliseconds() as f64 / 1000.0;
      self.position + elapsed.max(0.0)
    } else {
      self.position
    }
  }
}

impl Default for PlaybackState {
  fn default() -> Self {
    Self { url: String::new(), playing: false, position: 0.0, updated_at: Utc::now() }
  }
}

/// Persisted room document: roster, chat log and shared playback state.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
  pub room_id: RoomId,
  pub owner: String,
  pub users: Vec<Membership>,
  pub messages: Vec<ChatMessage>,
  pub video_state: PlaybackState,
}

impl Room {
  pub fn new(room_id: RoomId, owner: impl Into<String>, connection_id: ConnectionId) -> Self {
    let owner = owner.into();
    Self {
      room_id,
      users: vec![Membership::new(owner.clone(), connection_id)],
      owner,
      messages: Vec::new(),
      video_state: PlaybackState::default(),
    }
  }

  /// Adds `username` to the roster, or refreshes its connection id in place
  /// on rejoin. The roster never holds two entries for one username.
  pub fn upsert_member(&mut self, username: &str, connection_id: ConnectionId) {
    match self.users.iter_mut().find(|m| m.username == username) {
      Some(member) => member.connection_id = connection_id,
      None => self.users.push(Membership::new(username, connection_id)),
    }
  }

  /// Removes the entry matching `connection_id`. Returns false if no entry
  /// matched, which is not an error.
  pub fn remove_member(&mut self, connection_id: ConnectionId) -> bool {
    let before = self.users.len();
    self.users.retain(|m| m.connection_id != connection_id);
    self.users.len() != before
  }

  pub fn set_muted(&mut self, connection_id: ConnectionId, is_muted: bool) -> bool {
    match self.users.iter_mut().find(|m| m.connection_id == connection_id) {
      Some(member) => {
        member.is_muted = is_muted;
        true
      }
      None => false,
    }
  }

  pub fn member_ids(&self) -> Vec<ConnectionId> {
    self.users.iter().map(|m| m.connection_id).collect()
  }
}
