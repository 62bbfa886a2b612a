use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::room::{ChatMessage, Membership, PlaybackEvent, PlaybackState};

use super::connection::ConnectionId;

/// Client-to-server protocol. Room ids arrive as raw strings and are
/// trimmed at dispatch.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
  #[serde(rename_all = "camelCase")]
  CreateRoom { room_id: String, username: String },
  #[serde(rename_all = "camelCase")]
  JoinRoom { room_id: String, username: String },
  #[serde(rename_all = "camelCase")]
  LeaveRoom { room_id: String },
  #[serde(rename_all = "camelCase")]
  DeleteRoom { room_id: String },
  #[serde(rename_all = "camelCase")]
  ChangeVideo { room_id: String, url: String },
  #[serde(rename_all = "camelCase")]
  VideoState {
    room_id: String,
    #[serde(flatten)]
    event: PlaybackEvent,
  },
  #[serde(rename_all = "camelCase")]
  SendMessage { room_id: String, author: String, text: String },
  Signal { to: ConnectionId, payload: Value },
  #[serde(rename_all = "camelCase")]
  ToggleMute { room_id: String, is_muted: bool },
}

/// Server-to-client protocol. `Connected` is sent once per socket so the
/// client learns its own connection id; everything else follows from room
/// membership.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
  #[serde(rename_all = "camelCase")]
  Connected { connection_id: ConnectionId },
  #[serde(rename_all = "camelCase")]
  RoomSync {
    owner: String,
    users: Vec<Membership>,
    messages: Vec<ChatMessage>,
    video_state: PlaybackState,
  },
  AllUsers { users: Vec<Membership> },
  #[serde(rename_all = "camelCase")]
  UserConnected { username: String, connection_id: ConnectionId, is_muted: bool },
  #[serde(rename_all = "camelCase")]
  UserDisconnected { connection_id: ConnectionId },
  RoomEnded,
  ErrorRoomNotFound,
  ErrorRoomExists,
  ChangeVideo { url: String },
  VideoState {
    #[serde(flatten)]
    event: PlaybackEvent,
  },
  ReceiveMessage {
    #[serde(flatten)]
    message: ChatMessage,
  },
  Signal { from: ConnectionId, payload: Value },
}

impl fmt::Display for ClientEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&serde_json::to_string(self).map_err(|_| fmt::Error)?)
  }
}

impl fmt::Display for ServerEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&serde_json::to_string(self).map_err(|_| fmt::Error)?)
  }
}

impl FromStr for ClientEvent {
  type Err = serde_json::Error;

  fn from_str(s: &str) -> serde_json::Result<Self> {
    serde_json::from_str(s)
  }
}

impl FromStr for ServerEvent {
  type Err = serde_json::Error;

  fn from_str(s: &str) -> serde_json::Result<Self> {
    serde_json::from_str(s)
  }
}
