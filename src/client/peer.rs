use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::session::ConnectionId;

use super::media::{LocalMedia, RemoteStream};

#[derive(Debug, Error)]
#[error("negotiation failed: {0}")]
pub struct NegotiationError(pub String);

/// Which side opened the link. The joiner initiates toward every member
/// already present; the present member only ever responds. Exactly one
/// initiator per pair, with no coordination round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerRole {
  Initiator,
  Responder,
}

/// The opaque negotiation object for one direct media link. Payloads are
/// forwarded through the relay without interpretation; implementations own
/// their media resources and must release them in `close`.
pub trait PeerTransport: Send {
  /// Initiator's opening move: the first batch of negotiation payloads to
  /// send to the remote side.
  fn start(&mut self) -> Result<Vec<Value>, NegotiationError>;

  /// Feeds one remote payload in, collecting any reply payloads.
  fn apply_signal(&mut self, payload: Value) -> Result<Vec<Value>, NegotiationError>;

  /// The remote media stream, once negotiation has delivered it.
  fn take_remote_stream(&mut self) -> Option<RemoteStream>;

  /// Synchronously releases the link's media resources. Idempotent.
  fn close(&mut self);
}

/// Builds transports. The seam where a real WebRTC stack would sit.
pub trait PeerFactory: Send {
  fn create(
    &mut self,
    role: PeerRole,
    local: Option<&dyn LocalMedia>,
  ) -> Result<Box<dyn PeerTransport>, NegotiationError>;
}

/// One client's local handle to a direct media link with one remote member.
/// `remote_username` is `None` until the roster has named the peer; such a
/// link renders as "connecting".
pub struct PeerLink {
  pub peer_id: ConnectionId,
  pub role: PeerRole,
  pub remote_username: Option<String>,
  pub remote_muted: bool,
  pub remote_stream: Option<RemoteStream>,
  transport: Box<dyn PeerTransport>,
}

impl PeerLink {
  pub fn new(peer_id: ConnectionId, role: PeerRole, transport: Box<dyn PeerTransport>) -> Self {
    Self { peer_id, role, remote_username: None, remote_muted: true, remote_stream: None, transport }
  }

  pub(super) fn start(&mut self) -> Result<Vec<Value>, NegotiationError> {
    self.transport.start()
  }

  pub(super) fn apply_signal(&mut self, payload: Value) -> Result<Vec<Value>, NegotiationError> {
    let replies = self.transport.apply_signal(payload)?;
    if self.remote_stream.is_none() {
      self.remote_stream = self.transport.take_remote_stream();
    }
    Ok(replies)
  }

  /// Releases media resources synchronously with the call.
  pub fn close(&mut self) {
    self.transport.close();
  }
}

/// Owned registry of links keyed by peer id. All mutation goes through
/// insert-if-absent and remove, never ad hoc splicing, so duplicate-link
/// races surface at this interface.
#[derive(Default)]
pub struct PeerRegistry {
  links: HashMap<ConnectionId, PeerLink>,
}

impl PeerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// At most one link per peer id: a second insert for a present id is a
  /// protocol violation and hands the rejected link back untouched.
  pub fn insert_if_absent(&mut self, link: PeerLink) -> Result<&mut PeerLink, PeerLink> {
    match self.links.entry(link.peer_id) {
      std::collections::hash_map::Entry::Occupied(_) => Err(link),
      std::collections::hash_map::Entry::Vacant(slot) => Ok(slot.insert(link)),
    }
  }

  pub fn remove(&mut self, peer_id: ConnectionId) -> Option<PeerLink> {
    self.links.remove(&peer_id)
  }

  pub fn get(&self, peer_id: ConnectionId) -> Option<&PeerLink> {
    self.links.get(&peer_id)
  }

  pub fn get_mut(&mut self, peer_id: ConnectionId) -> Option<&mut PeerLink> {
    self.links.get_mut(&peer_id)
  }

  pub fn contains(&self, peer_id: ConnectionId) -> bool {
    self.links.contains_key(&peer_id)
  }

  pub fn peer_ids(&self) -> Vec<ConnectionId> {
    self.links.keys().copied().collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = &PeerLink> {
    self.links.values()
  }

  pub fn len(&self) -> usize {
    self.links.len()
  }

  pub fn is_empty(&self) -> bool {
    self.links.is_empty()
  }

  pub fn drain(&mut self) -> Vec<PeerLink> {
    self.links.drain().map(|(_, link)| link).collect()
  }
}
