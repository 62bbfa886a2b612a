use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[error("capture device unavailable: {0}")]
pub struct CaptureError(pub String);

/// Handle to the local capture stream. Mute toggling disables the tracks
/// without releasing the device; `stop` releases it for good.
pub trait LocalMedia: Send {
  fn set_enabled(&mut self, enabled: bool);
  fn stop(&mut self);
}

/// Opaque handle to a remote member's media, delivered by the transport
/// once negotiation completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteStream {
  pub id: String,
}

/// Acquires the local capture device before any join is attempted.
pub trait CaptureDevice {
  fn acquire(&mut self) -> Result<Box<dyn LocalMedia>, CaptureError>;
}

/// The capture grant gates joining, but denial is not fatal: the user
/// proceeds muted with no outgoing stream.
pub fn acquire_or_muted(device: &mut dyn CaptureDevice) -> Option<Box<dyn LocalMedia>> {
  match device.acquire() {
    Ok(media) => Some(media),
    Err(e) => {
      warn!("{e}; continuing without voice");
      None
    }
  }
}
