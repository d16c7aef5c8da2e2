use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{close_code, Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::extract_token;
use crate::connection_manager::{ConnectionHandle, ConnectionState};
use crate::metrics::{ConnectionMetrics, RelayMetrics};
use crate::server::AppState;

use super::message::OutboundMessage;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Why the receive loop of an open connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// Client sent a close frame
    ClientClosed,
    /// Stream ended without a close frame
    Disconnected,
    ReceiveError,
    /// Binary frame on a text-only relay
    UnsupportedData,
    /// Pruned by a broadcast pass or asked to leave at shutdown
    Requested(u16),
}

impl CloseReason {
    fn close_code(self) -> u16 {
        match self {
            Self::ClientClosed | Self::Disconnected => close_code::NORMAL,
            Self::ReceiveError => close_code::ERROR,
            Self::UnsupportedData => close_code::UNSUPPORTED,
            Self::Requested(code) => code,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client closed",
            Self::Disconnected => "disconnected",
            Self::ReceiveError => "receive error",
            Self::UnsupportedData => "binary frames are not supported",
            Self::Requested(code) if code == close_code::AWAY => "server shutting down",
            Self::Requested(_) => "connection dropped by server",
        }
    }
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip_all,
    fields(peer = %peer)
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    query: Result<Query<WsQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    tracing::debug!(state = %ConnectionState::Authenticating, "Checking connection token");

    // A malformed query (e.g. a repeated `token`) counts as no query token
    let query_token = match query {
        Ok(Query(query)) => query.token,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unparseable query string");
            None
        }
    };

    let token = extract_token(query_token.as_deref(), &headers);
    let authorized = match state.token_validator.validate(token.as_deref()) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Unauthorized access attempt");
            ConnectionMetrics::record_auth_failure();
            false
        }
    };

    // The handshake completes either way so a rejected client receives a
    // policy-violation close frame instead of a bare HTTP error.
    ws.on_upgrade(move |socket| async move {
        if authorized {
            handle_socket(socket, state, peer).await;
        } else {
            reject_socket(socket, state.settings.relay.close_timeout()).await;
        }
    })
}

/// Close an unauthenticated socket with 1008 without registering it
async fn reject_socket(mut socket: WebSocket, close_timeout: Duration) {
    let frame = OutboundMessage::close(close_code::POLICY, "invalid token").into_message();
    if let Err(e) = socket.send(frame).await {
        tracing::debug!(error = %e, "Failed to send policy-violation close frame");
        return;
    }

    // Wait for the client's close reply so the frame is not lost to a reset
    let _ = tokio::time::timeout(close_timeout, async {
        while let Some(Ok(_)) = socket.recv().await {}
    })
    .await;
}

/// Handle an established, authenticated WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, peer),
    fields(peer = %peer)
)]
async fn handle_socket(socket: WebSocket, state: AppState, peer: SocketAddr) {
    let relay = &state.settings.relay;

    // Create channel for sending messages to this connection
    let (tx, rx) = mpsc::channel::<OutboundMessage>(relay.send_buffer_size);
    let handle = Arc::new(ConnectionHandle::new(tx, Some(peer)));
    let connection_id = handle.id;

    state.connection_manager.register(handle.clone());
    ConnectionMetrics::record_opened();

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    // Split socket into sender and receiver
    let (ws_sender, mut ws_receiver) = socket.split();
    let send_task = tokio::spawn(write_outbound(ws_sender, rx, handle.clone()));

    let reason = receive_loop(&mut ws_receiver, &state, &handle).await;

    // Closing: leave the registry first so no later pass targets this connection
    handle.transition(ConnectionState::Closing);
    state.connection_manager.unregister(connection_id);
    close_connection(&handle, send_task, reason, relay.close_timeout()).await;
    handle.transition(ConnectionState::Closed);

    let lifetime = handle.age();
    ConnectionMetrics::record_closed(lifetime);

    tracing::info!(
        connection_id = %connection_id,
        reason = reason.as_str(),
        duration_secs = lifetime.as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Relay inbound text until the client leaves, errors, or a close is requested
async fn receive_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> CloseReason {
    loop {
        tokio::select! {
            code = handle.close_requested() => {
                tracing::debug!(connection_id = %handle.id, code, "Close requested");
                return CloseReason::Requested(code);
            }
            next = ws_receiver.next() => {
                let msg = match next {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::warn!(connection_id = %handle.id, error = %e, "WebSocket receive error");
                        return CloseReason::ReceiveError;
                    }
                    None => return CloseReason::Disconnected,
                };

                if let Some(reason) = process_message(msg, state, handle).await {
                    return reason;
                }
            }
        }
    }
}

/// Process a received WebSocket message
/// Returns a reason when the connection should be closed
async fn process_message(
    msg: Message,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> Option<CloseReason> {
    match msg {
        Message::Text(text) => {
            RelayMetrics::record_received();
            tracing::debug!(connection_id = %handle.id, len = text.as_str().len(), "Message received");
            state.broadcaster.broadcast(text, handle).await;
            None
        }
        Message::Binary(_) => {
            tracing::warn!(connection_id = %handle.id, "Binary frame received on text relay");
            Some(CloseReason::UnsupportedData)
        }
        // Axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => None,
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            Some(CloseReason::ClientClosed)
        }
    }
}

/// Writer task: drains the outbound queue into the socket
async fn write_outbound<S>(
    mut ws_sender: S,
    mut rx: mpsc::Receiver<OutboundMessage>,
    handle: Arc<ConnectionHandle>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(msg) = rx.recv().await {
        let closing = msg.is_close();

        if let Err(e) = ws_sender.send(msg.into_message()).await {
            if !closing {
                tracing::debug!(connection_id = %handle.id, error = %e, "WebSocket send failed");
                handle.request_close(close_code::ERROR);
            }
            break;
        }

        if closing {
            break;
        }
    }

    let _ = ws_sender.close().await;
}

/// Best-effort close: queue a close frame and give the writer a bounded time to flush it
async fn close_connection(
    handle: &ConnectionHandle,
    mut send_task: JoinHandle<()>,
    reason: CloseReason,
    close_timeout: Duration,
) {
    if !handle.try_send_close(reason.close_code(), reason.as_str()) {
        tracing::debug!(connection_id = %handle.id, "Close frame not queued");
    }

    if tokio::time::timeout(close_timeout, &mut send_task).await.is_err() {
        tracing::debug!(connection_id = %handle.id, "Writer did not finish in time, aborting");
        send_task.abort();
    }
}
