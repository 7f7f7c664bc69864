use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::connection_manager::{ConnectionHandle, ConnectionRegistry};
use crate::error::AppError;
use crate::metrics::{
    WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTIONS_REJECTED, WS_CONNECTION_DURATION,
};
use crate::notification::RecipientId;
use crate::server::AppState;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

/// How long a closing connection may spend flushing its close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    if state.shutdown.is_triggered() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
    }

    let Some(token) = extract_token(&query, &headers) else {
        WS_CONNECTIONS_REJECTED.inc();
        return AppError::Auth("Missing authentication token".to_string()).into_response();
    };

    let recipient = match state.identity.authenticate(&token) {
        Ok(recipient) => recipient,
        Err(e) => {
            WS_CONNECTIONS_REJECTED.inc();
            tracing::warn!(error = %e, "Handshake authentication failed");
            return e.into_response();
        }
    };

    tracing::info!(recipient = %recipient, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, recipient))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(ref token) = query.token {
        if !token.is_empty() {
            return Some(token.clone());
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Unregisters the connection on every exit path, including task cancellation
struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    handle: Arc<ConnectionHandle>,
    started: Instant,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.handle.recipient, self.handle.id);
        self.handle.finish_close();

        WS_CONNECTIONS_CLOSED.inc();
        let duration = self.started.elapsed().as_secs_f64();
        WS_CONNECTION_DURATION.observe(duration);

        tracing::info!(
            connection_id = %self.handle.id,
            recipient = %self.handle.recipient,
            duration_secs = duration,
            "WebSocket connection closed"
        );
    }
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, recipient),
    fields(recipient = %recipient, otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState, recipient: RecipientId) {
    let ws_config = &state.settings.websocket;
    let send_timeout = ws_config.send_timeout();

    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(ws_config.channel_buffer.max(1));
    let handle = Arc::new(ConnectionHandle::new(recipient, tx));

    let _guard = ConnectionGuard {
        registry: state.registry.clone(),
        handle: handle.clone(),
        started: Instant::now(),
    };

    if !state.registry.register(handle.clone()) {
        return;
    }
    WS_CONNECTIONS_OPENED.inc();

    let connection_id = handle.id;
    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Writer: drains the outbound channel until the connection starts closing
    let writer_handle = handle.clone();
    let shutdown = state.shutdown.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize message");
                            continue;
                        }
                    };

                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = writer_handle.closing() => break,
                _ = shutdown.triggered() => break,
            }
        }
        let _ = ws_sender.close().await;
    });

    let reader_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &reader_handle, send_timeout).await {
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
    }

    // Open -> Closing: stop fan-out to this connection and let the writer flush a close frame
    handle.begin_close();
    recv_task.abort();
    if tokio::time::timeout(CLOSE_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
}

/// Process a received WebSocket message.
/// Returns false if the connection should be closed
async fn process_message(msg: Message, handle: &ConnectionHandle, send_timeout: Duration) -> bool {
    match msg {
        Message::Text(text) => {
            let reply = match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => ServerMessage::Pong,
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to parse client message");
                    ServerMessage::error("INVALID_MESSAGE", e.to_string())
                }
            };
            handle
                .send(OutboundMessage::Raw(reply), send_timeout)
                .await
                .is_ok()
        }
        Message::Binary(_) => handle
            .send(
                OutboundMessage::Raw(ServerMessage::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                )),
                send_timeout,
            )
            .await
            .is_ok(),
        // Axum answers protocol pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}
