//! Live endpoint: WebSocket upgrade and per-connection send/receive tasks.

mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{OutboundMessage, CLOSE_NORMAL, SHUTDOWN_REASON};
