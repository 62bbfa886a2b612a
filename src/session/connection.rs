use std::fmt;

use axum::extract::ws::Message;
use axum::Error;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use ulid::Ulid;

use crate::room::RoomId;

pub type ConnectionSender = UnboundedSender<Result<Message, Error>>;

/// Identifies one live transport session. Minted on connect, never reused;
/// a reconnecting user gets a fresh one.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(Ulid);

impl ConnectionId {
  pub fn new() -> Self {
    Self(Ulid::new())
  }
}

impl Default for ConnectionId {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for ConnectionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0.to_string().to_lowercase())
  }
}

#[derive(Debug, Serialize)]
pub struct Connection {
  pub id: ConnectionId,
  /// The room this transport session currently belongs to, if any.
  pub room: Option<RoomId>,
  pub is_alive: bool,
  #[serde(skip)]
  pub sender: ConnectionSender,
}

impl Connection {
  pub(super) fn new(id: ConnectionId, sender: ConnectionSender) -> Self {
    Self { id, room: None, is_alive: true, sender }
  }
}
