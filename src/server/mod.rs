mod handlers;
mod state;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::{info, Level};

use crate::session::Sessions;

use self::state::ServerState;

#[derive(Clone, Debug)]
pub struct Config {
  pub port: u16,
  pub heartbeat_secs: u64,
  /// CORS allowlist entry; `None` means any origin (development).
  pub allowed_origin: Option<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self { port: 3000, heartbeat_secs: 10, allowed_origin: None }
  }
}

pub struct Server {
  config: Config,
  sessions: Sessions,
}

impl Server {
  pub fn new(config: Config, sessions: Sessions) -> Self {
    Self { config, sessions }
  }

  pub async fn listen(self) -> Result<()> {
    let heartbeat = Duration::from_secs(self.config.heartbeat_secs);
    let state = ServerState::new(self.sessions, heartbeat);
    let app = Router::new()
      .route("/", get(handlers::socket))
      .route("/info", get(handlers::info))
      .layer(cors(self.config.allowed_origin.as_deref()))
      .layer(trace())
      .with_state(state);

    info!("starting server: {}", self.config.port);
    let addr = SocketAddr::new([0, 0, 0, 0].into(), self.config.port);
    axum::Server::bind(&addr)
      .serve(app.into_make_service_with_connect_info::<SocketAddr>())
      .await?;

    Ok(())
  }
}

fn cors(allowed_origin: Option<&str>) -> CorsLayer {
  let layer = CorsLayer::new().allow_methods([Method::GET]);
  match allowed_origin.and_then(|origin| origin.parse::<HeaderValue>().ok()) {
    Some(origin) => layer.allow_origin([origin]),
    None => layer.allow_origin(Any),
  }
}

fn trace() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
  TraceLayer::new_for_http()
    .on_response(DefaultOnResponse::new().level(Level::INFO).latency_unit(LatencyUnit::Micros))
}
