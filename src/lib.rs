pub mod client;
pub mod room;
pub mod server;
pub mod session;

pub use crate::server::{Config, Server};
pub use crate::session::Sessions;
