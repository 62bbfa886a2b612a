use thiserror::Error;

use crate::room::StoreError;

use super::connection::ConnectionId;

#[derive(Debug, Error)]
pub enum SessionError {
  /// Join or delete against an id with no room document.
  #[error("room not found")]
  RoomNotFound,
  /// Create against an id that already has a room document.
  #[error("room already exists")]
  RoomAlreadyExists,
  #[error("connection {0} does not exist")]
  UnknownConnection(ConnectionId),
  #[error("connection {0} is closed")]
  ConnectionClosed(ConnectionId),
  #[error(transparent)]
  Store(#[from] StoreError),
}
