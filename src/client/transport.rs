//! Live transport: one WebSocket session to the gateway.
//!
//! A [`LiveSession`] is the manager's end of a session; the transport keeps
//! the matching [`SessionPeer`] and feeds it from the socket. Test doubles
//! build the same pair with [`LiveSession::pair`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::ClientError;

/// Frames buffered between the socket task and the manager
const SESSION_BUFFER: usize = 256;

/// What a live session reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A text frame
    Message(String),
    /// A transport-level error; a `Closed` follows when the session ends
    Error(String),
    /// The session is over
    Closed,
}

/// Opens live sessions
#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<LiveSession, ClientError>;
}

struct SessionShared {
    open: AtomicBool,
    close_requested: AtomicBool,
    close_signal: Notify,
}

/// Manager side of a live session
pub struct LiveSession {
    events: mpsc::Receiver<TransportEvent>,
    shared: Arc<SessionShared>,
}

/// Transport side of a live session
pub struct SessionPeer {
    events: mpsc::Sender<TransportEvent>,
    shared: Arc<SessionShared>,
}

impl LiveSession {
    /// A connected session and the peer that drives it
    pub fn pair() -> (LiveSession, SessionPeer) {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        let shared = Arc::new(SessionShared {
            open: AtomicBool::new(true),
            close_requested: AtomicBool::new(false),
            close_signal: Notify::new(),
        });

        (
            LiveSession {
                events: rx,
                shared: shared.clone(),
            },
            SessionPeer { events: tx, shared },
        )
    }

    /// Next event; a peer that went away reads as `Closed`
    pub async fn next_event(&mut self) -> TransportEvent {
        match self.events.recv().await {
            Some(event) => {
                if event == TransportEvent::Closed {
                    self.shared.open.store(false, Ordering::SeqCst);
                }
                event
            }
            None => {
                self.shared.open.store(false, Ordering::SeqCst);
                TransportEvent::Closed
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Ask the transport to close the session
    pub fn close(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
        if !self.shared.close_requested.swap(true, Ordering::SeqCst) {
            self.shared.close_signal.notify_one();
        }
    }
}

impl SessionPeer {
    /// Hand a text frame to the manager. Returns false once the manager is gone.
    pub async fn deliver(&self, text: impl Into<String>) -> bool {
        self.events
            .send(TransportEvent::Message(text.into()))
            .await
            .is_ok()
    }

    pub async fn fail(&self, error: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Error(error.into())).await;
    }

    /// End the session from the transport side
    pub async fn close(self) {
        self.shared.open.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Closed).await;
    }

    /// Mark the session dead without telling the manager, as a half-open
    /// socket looks from the outside
    pub fn disconnect_silently(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub fn close_requested(&self) -> bool {
        self.shared.close_requested.load(Ordering::SeqCst)
    }

    /// Resolves once the manager has asked for the session to close
    pub async fn wait_close_requested(&self) {
        while !self.close_requested() {
            self.shared.close_signal.notified().await;
        }
    }
}

impl Drop for SessionPeer {
    fn drop(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LiveTransport for WsTransport {
    async fn open(&self, url: &str) -> Result<LiveSession, ClientError> {
        let (socket, response) = tokio_tungstenite::connect_async(url).await?;
        tracing::debug!(url = %url, status = %response.status(), "Live session opened");

        let (session, peer) = LiveSession::pair();
        tokio::spawn(pump(socket, peer));
        Ok(session)
    }
}

/// Copy frames from the socket to the session until either side ends it
async fn pump(mut socket: WebSocketStream<MaybeTlsStream<TcpStream>>, peer: SessionPeer) {
    loop {
        tokio::select! {
            _ = peer.wait_close_requested() => {
                if let Err(e) = socket.close(None).await {
                    tracing::debug!(error = %e, "Failed to send close frame");
                }
                break;
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !peer.deliver(text.as_str()).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        tracing::info!(code = %frame.code, reason = %frame.reason.as_str(), "Live session closed by server");
                    }
                    break;
                }
                // Pings are answered by tungstenite on the next read
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    peer.fail(e.to_string()).await;
                    break;
                }
                None => break,
            },
        }
    }

    peer.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_pair_delivers_in_order() {
        let (mut session, peer) = LiveSession::pair();

        assert!(peer.deliver("a").await);
        peer.fail("boom").await;
        peer.close().await;

        assert_eq!(session.next_event().await, TransportEvent::Message("a".into()));
        assert_eq!(session.next_event().await, TransportEvent::Error("boom".into()));
        assert_eq!(session.next_event().await, TransportEvent::Closed);
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_dropped_peer_reads_as_closed() {
        let (mut session, peer) = LiveSession::pair();
        drop(peer);

        assert!(!session.is_open());
        assert_eq!(session.next_event().await, TransportEvent::Closed);
    }

    #[tokio::test]
    async fn test_close_request_reaches_peer() {
        let (session, peer) = LiveSession::pair();

        session.close();

        tokio::time::timeout(std::time::Duration::from_secs(1), peer.wait_close_requested())
            .await
            .expect("close request should be observed");
        assert!(!peer.is_open());
    }
}
