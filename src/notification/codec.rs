//! Wire codec shared by the broker and the real-time push.
//!
//! Broker payloads are JSON envelopes (`{"recipient": .., "status": {..}}`);
//! WebSocket clients receive the push frame produced by [`encode_push`].

use thiserror::Error;

use crate::websocket::ServerMessage;

use super::{Envelope, StatusMessage};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to decode status message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode status message: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Encode a status message; optional fields that are absent are omitted
pub fn encode(message: &StatusMessage) -> CodecResult<String> {
    serde_json::to_string(message).map_err(CodecError::Encode)
}

/// Decode a status message, rejecting missing required fields and unknown severities
pub fn decode(wire: &str) -> CodecResult<StatusMessage> {
    serde_json::from_str(wire).map_err(CodecError::Decode)
}

pub fn encode_envelope(envelope: &Envelope) -> CodecResult<String> {
    serde_json::to_string(envelope).map_err(CodecError::Encode)
}

pub fn decode_envelope(wire: &str) -> CodecResult<Envelope> {
    serde_json::from_str(wire).map_err(CodecError::Decode)
}

/// Encode the frame pushed to WebSocket clients.
///
/// Unlike the broker format, `payload` is always present (as `null` when empty).
pub fn encode_push(message: &StatusMessage) -> CodecResult<String> {
    serde_json::to_string(&ServerMessage::from(message.clone())).map_err(CodecError::Encode)
}
