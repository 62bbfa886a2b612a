use std::time::Duration;

use crate::session::Sessions;

#[derive(Clone)]
pub(crate) struct ServerState {
  pub sessions: Sessions,
  pub heartbeat: Duration,
}

impl ServerState {
  pub fn new(sessions: Sessions, heartbeat: Duration) -> Self {
    Self { sessions, heartbeat }
  }
}
