use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::server::state::ServerState;

pub(crate) async fn info(State(state): State<ServerState>) -> impl IntoResponse {
  let connections = serde_json::to_value(state.sessions.connections().to_vec()).unwrap_or_default();
  let rooms = match state.sessions.room_ids() {
    Ok(ids) => serde_json::to_value(ids).unwrap_or_default(),
    Err(e) => {
      error!("{e}");
      serde_json::Value::Null
    }
  };
  Json(json!({ "connections": connections, "rooms": rooms }))
}
