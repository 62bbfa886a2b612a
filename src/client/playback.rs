use std::time::{Duration, Instant};

use chrono::Utc;

use crate::room::{PlaybackEvent, PlaybackKind, PlaybackState};

/// Suppresses the feedback loop between remote playback events and the
/// local player's asynchronous state-change callback: after applying a
/// remote event, locally observed player changes are dropped for a short
/// window. A timer, not a lock.
#[derive(Debug)]
pub struct EchoGuard {
  window: Duration,
  armed_until: Option<Instant>,
}

impl EchoGuard {
  /// Long enough to absorb the player's asynchronous callback, short
  /// enough not to swallow a real user action that follows.
  pub const DEFAULT_WINDOW: Duration = Duration::from_millis(800);

  pub fn new(window: Duration) -> Self {
    Self { window, armed_until: None }
  }

  pub fn arm(&mut self) {
    self.arm_at(Instant::now());
  }

  pub fn is_active(&self) -> bool {
    self.is_active_at(Instant::now())
  }

  fn arm_at(&mut self, now: Instant) {
    self.armed_until = Some(now + self.window);
  }

  fn is_active_at(&self, now: Instant) -> bool {
    self.armed_until.map(|until| now < until).unwrap_or(false)
  }
}

impl Default for EchoGuard {
  fn default() -> Self {
    Self::new(Self::DEFAULT_WINDOW)
  }
}

/// The local player seam. A UI backs this with an embedded video player;
/// tests back it with a recorder.
pub trait Player: Send {
  fn load(&mut self, url: &str);
  fn set_playing(&mut self, playing: bool);
  fn seek(&mut self, position: f64);
  fn position(&self) -> f64;
}

/// Applies remote playback decisions to the local player and gates local
/// ones through the echo guard.
pub struct PlaybackController {
  player: Box<dyn Player>,
  guard: EchoGuard,
}

impl PlaybackController {
  pub fn new(player: Box<dyn Player>) -> Self {
    Self { player, guard: EchoGuard::default() }
  }

  /// Reconciles the player against a freshly received snapshot: seek to
  /// the extrapolated live position, then adopt the play flag.
  pub fn apply_snapshot(&mut self, state: &PlaybackState) {
    if state.url.is_empty() {
      return;
    }
    self.guard.arm();
    self.player.load(&state.url);
    self.player.seek(state.live_position(Utc::now()));
    self.player.set_playing(state.playing);
  }

  /// Remote fresh-video notice: reset to the new url at position zero.
  pub fn apply_change_video(&mut self, url: &str) {
    self.guard.arm();
    self.player.load(url);
    self.player.seek(0.0);
    self.player.set_playing(true);
  }

  /// Remote incremental event, applied verbatim.
  pub fn apply_remote(&mut self, event: &PlaybackEvent) {
    self.guard.arm();
    match event.kind {
      PlaybackKind::Playpause => self.player.set_playing(event.playing),
      PlaybackKind::Seek => {
        self.player.seek(event.position);
        self.player.set_playing(true);
      }
    }
  }

  /// A locally observed player change. Returns the event to publish, or
  /// `None` when it is just the echo of a remote event we applied.
  pub fn local_event(&mut self, kind: PlaybackKind, playing: bool) -> Option<PlaybackEvent> {
    if self.guard.is_active() {
      return None;
    }
    Some(PlaybackEvent { kind, playing, position: self.player.position() })
  }
}
