//! Reconnecting client for the live endpoint.
//!
//! [`ClientConnectionManager`] keeps one live session open, reconnecting with
//! exponential backoff. Once the reconnect budget is spent it falls back to
//! polling `/api/updates`. Subscribers see the same [`Event`](crate::event::Event)
//! stream on both paths.
//!
//! Transports and the HTTP source sit behind traits so the manager can be
//! driven without a network.

mod backoff;
mod manager;
mod source;
mod subscribers;
mod transport;
mod view;

use thiserror::Error;

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use manager::{ClientConnectionManager, ConnectionMode, ManagerSettings, ManagerStatus};
pub use source::{HttpUpdatesSource, UpdatesPage, UpdatesSource};
pub use subscribers::{SubscriberSet, Subscription};
pub use transport::{LiveSession, LiveTransport, SessionPeer, TransportEvent, WsTransport};
pub use view::LinkView;

/// Errors raised by client transports and the updates source.
///
/// None of these reach subscribers; the manager logs them and moves on.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}
