use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use super::model::{Room, RoomId};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("room document already exists")]
  AlreadyExists,
  #[error("room store unavailable: {0}")]
  Unavailable(String),
}

/// Keyed room-document store with atomic single-document operations. The
/// seam where a durable backend would plug in; `MemoryStore` is the only
/// implementation this process ships.
pub trait RoomStore: Send + Sync {
  /// Creates the document, failing with `AlreadyExists` if the id is taken.
  /// The insert-or-fail decision is atomic: two racing creates cannot both
  /// succeed.
  fn insert_if_absent(&self, room: Room) -> Result<(), StoreError>;

  fn read(&self, id: &RoomId) -> Result<Option<Room>, StoreError>;

  /// Atomic read-modify-write of one document. Returns false (and does not
  /// run `apply`) if the document does not exist.
  fn update(&self, id: &RoomId, apply: &mut dyn FnMut(&mut Room)) -> Result<bool, StoreError>;

  fn remove(&self, id: &RoomId) -> Result<bool, StoreError>;

  fn room_ids(&self) -> Result<Vec<RoomId>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
  rooms: RwLock<HashMap<RoomId, Room>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl RoomStore for MemoryStore {
  fn insert_if_absent(&self, room: Room) -> Result<(), StoreError> {
    let mut rooms = self.rooms.write();
    if rooms.contains_key(&room.room_id) {
      return Err(StoreError::AlreadyExists);
    }
    rooms.insert(room.room_id.clone(), room);
    Ok(())
  }

  fn read(&self, id: &RoomId) -> Result<Option<Room>, StoreError> {
    Ok(self.rooms.read().get(id).cloned())
  }

  fn update(&self, id: &RoomId, apply: &mut dyn FnMut(&mut Room)) -> Result<bool, StoreError> {
    match self.rooms.write().get_mut(id) {
      Some(room) => {
        apply(room);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn remove(&self, id: &RoomId) -> Result<bool, StoreError> {
    Ok(self.rooms.write().remove(id).is_some())
  }

  fn room_ids(&self) -> Result<Vec<RoomId>, StoreError> {
    Ok(self.rooms.read().keys().cloned().collect())
  }
}
