use std::sync::Arc;

/// Close code sent to clients when the server goes away
pub const CLOSE_NORMAL: u16 = 1000;

/// Reason sent with the shutdown close frame
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// Frames queued for a single connection's send task
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Serialized event, shared across every connection it fans out to
    Event(Arc<str>),
    /// Keep-alive ping
    Ping,
    /// Close the connection with a code and reason
    Close { code: u16, reason: String },
}

impl OutboundMessage {
    pub fn event(text: impl Into<Arc<str>>) -> Self {
        Self::Event(text.into())
    }

    pub fn shutdown() -> Self {
        Self::Close {
            code: CLOSE_NORMAL,
            reason: SHUTDOWN_REASON.to_string(),
        }
    }

    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Event(_) => "event",
            OutboundMessage::Ping => "ping",
            OutboundMessage::Close { .. } => "close",
        }
    }
}
