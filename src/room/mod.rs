mod model;
mod store;

pub use self::model::{
  ChatMessage, Membership, PlaybackEvent, PlaybackKind, PlaybackState, Room, RoomId,
};
pub use self::store::{MemoryStore, RoomStore, StoreError};
