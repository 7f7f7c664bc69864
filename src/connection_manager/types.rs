//! Connection handle and related types

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::notification::RecipientId;
use crate::websocket::OutboundMessage;

/// Lifecycle of a real-time connection.
///
/// `Connecting -> Open -> Closing -> Closed`; nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Failure to write to a single connection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionWriteError {
    #[error("Connection {0} is closed")]
    Closed(Uuid),

    #[error("Write to connection {connection_id} timed out after {timeout_ms}ms")]
    Timeout { connection_id: Uuid, timeout_ms: u64 },
}

/// Handle for a single WebSocket connection
pub struct ConnectionHandle {
    pub id: Uuid,
    pub recipient: RecipientId,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<OutboundMessage>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionHandle {
    pub fn new(recipient: RecipientId, sender: mpsc::Sender<OutboundMessage>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            id: Uuid::new_v4(),
            recipient,
            connected_at: Utc::now(),
            sender,
            state,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// `Connecting -> Open`. Returns false if the connection already moved on.
    pub fn open(&self) -> bool {
        self.transition(ConnectionState::Open, |s| s == ConnectionState::Connecting)
    }

    /// `Connecting | Open -> Closing`. Wakes anyone waiting in [`closing`](Self::closing).
    pub fn begin_close(&self) -> bool {
        self.transition(ConnectionState::Closing, |s| s < ConnectionState::Closing)
    }

    /// Terminal transition; idempotent
    pub fn finish_close(&self) {
        self.begin_close();
        self.transition(ConnectionState::Closed, |s| s == ConnectionState::Closing);
    }

    fn transition(&self, to: ConnectionState, allowed: impl Fn(ConnectionState) -> bool) -> bool {
        self.state.send_if_modified(|state| {
            if allowed(*state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the connection has left `Open` (or never reached it)
    pub async fn closing(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s >= ConnectionState::Closing).await;
    }

    /// True when the writer side is gone even though the state never said so
    pub fn is_orphaned(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue a frame on the connection's outbound channel.
    ///
    /// A full buffer is waited on for at most `timeout`; after that the write
    /// counts as failed so a stalled peer cannot hold up the caller.
    pub async fn send(
        &self,
        message: OutboundMessage,
        timeout: Duration,
    ) -> Result<(), ConnectionWriteError> {
        if self.state() >= ConnectionState::Closing {
            return Err(ConnectionWriteError::Closed(self.id));
        }

        match tokio::time::timeout(timeout, self.sender.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ConnectionWriteError::Closed(self.id)),
            Err(_) => Err(ConnectionWriteError::Timeout {
                connection_id: self.id,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("recipient", &self.recipient)
            .field("state", &self.state())
            .finish()
    }
}
