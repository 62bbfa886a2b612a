use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use syncroom::room::MemoryStore;
use syncroom::{Config, Server, Sessions};
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// Server port
  #[arg(short, long, env, default_value_t = 3000, value_parser = clap::value_parser!(u16).range(1025..))]
  port: u16,

  /// Seconds between connection liveness pings
  #[arg(long, env, default_value_t = 10)]
  heartbeat_secs: u64,

  /// Restrict CORS to this origin; omit to allow any
  #[arg(long, env)]
  allowed_origin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  if cfg!(not(debug_assertions)) {
    tracing_subscriber::fmt()
      .with_env_filter(
        EnvFilter::builder()
          .with_default_directive(Level::INFO.into())
          .from_env_lossy()
          .add_directive("hyper=off".parse()?)
          .add_directive("tungstenite=off".parse()?),
      )
      .init();
  } else {
    tracing_subscriber::fmt()
      .with_env_filter(
        EnvFilter::builder()
          .with_default_directive(Level::DEBUG.into())
          .from_env_lossy()
          .add_directive("hyper=off".parse()?)
          .add_directive("tungstenite=off".parse()?),
      )
      .without_time()
      .init();
  }

  let args = Args::parse();
  let config = Config {
    port: args.port,
    heartbeat_secs: args.heartbeat_secs,
    allowed_origin: args.allowed_origin,
  };
  let sessions = Sessions::new(Arc::new(MemoryStore::new()));
  let server = Server::new(config, sessions);
  server.listen().await
}
