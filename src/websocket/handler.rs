use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection_manager::ConnectionHandle;
use crate::metrics::WsMetrics;
use crate::server::AppState;

use super::message::OutboundMessage;

/// Time the send task gets to flush a close frame once the registry drops a connection
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler.
///
/// Plain HTTP requests get 426. Every accepted upgrade makes sure the relay
/// subscription is running.
#[tracing::instrument(name = "ws.upgrade", skip_all)]
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            WsMetrics::record_upgrade_rejected();
            tracing::debug!(reason = %rejection, "Rejected non-upgrade request");
            return (
                StatusCode::UPGRADE_REQUIRED,
                [(header::UPGRADE, "websocket")],
                "Expected Upgrade: WebSocket",
            )
                .into_response();
        }
    };

    if state.gateway.ensure_started() {
        tracing::info!("Relay subscription started by first upgrade");
    }

    ws.on_failed_upgrade(|e| {
        tracing::warn!(error = %e, "WebSocket upgrade failed");
    })
    .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip_all, fields(otel.kind = "server"))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_start = std::time::Instant::now();

    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.channel_buffer.max(1));
    let handle = state.registry.register(tx);
    let connection_id = handle.id;

    WsMetrics::record_opened();
    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending queued messages to the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let (frame, last) = match msg {
                OutboundMessage::Event(text) => (Message::Text(text.to_string().into()), false),
                OutboundMessage::Ping => (Message::Ping(Bytes::new()), false),
                OutboundMessage::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };

            if ws_sender.send(frame).await.is_err() || last {
                break;
            }
        }
    });

    // Task for receiving frames from the WebSocket
    let handle_clone = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &handle_clone) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
        _ = handle.closed() => {
            tracing::debug!(connection_id = %connection_id, "Connection closed by server");
            let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task).await;
        }
    }
    send_task.abort();
    recv_task.abort();

    state.registry.unregister(connection_id);

    let duration = connection_start.elapsed().as_secs_f64();
    WsMetrics::record_closed(duration);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Process a received frame. Returns false if the connection should be closed.
///
/// Clients only listen; text they send is treated as activity and otherwise ignored.
fn process_message(msg: Message, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(_) => {
            WsMetrics::record_frame("text");
            handle.update_activity();
            true
        }
        Message::Binary(_) => {
            WsMetrics::record_frame("binary");
            handle.update_activity();
            true
        }
        Message::Ping(_) => {
            WsMetrics::record_frame("ping");
            // Axum answers pings automatically
            handle.update_activity();
            true
        }
        Message::Pong(_) => {
            WsMetrics::record_frame("pong");
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            WsMetrics::record_frame("close");
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            handle.mark_closing();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::ConnectionState;

    #[test]
    fn test_close_frame_stops_connection() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = Arc::new(ConnectionHandle::new(tx));

        assert!(process_message(Message::Pong(Bytes::new()), &handle));
        assert!(!process_message(Message::Close(None), &handle));
        assert_eq!(handle.state(), ConnectionState::Closing);
    }
}
