use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::notification::{Severity, StatusMessage};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "statusMessage")]
    StatusMessage {
        status: i64,
        severity: Severity,
        message: String,
        #[serde(default)]
        payload: Option<Map<String, Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<Uuid>,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<StatusMessage> for ServerMessage {
    fn from(status: StatusMessage) -> Self {
        Self::StatusMessage {
            status: status.status,
            severity: status.severity,
            message: status.message,
            payload: status.payload,
            error_code: status.error_code,
        }
    }
}

/// Frame queued on a connection's outbound channel.
///
/// Fan-out serializes a status message once and shares the text across
/// every connection of the recipient.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Text(Arc<str>),
    Raw(ServerMessage),
}

impl OutboundMessage {
    pub fn text(frame: impl Into<Arc<str>>) -> Self {
        Self::Text(frame.into())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Text(text) => Ok(text.to_string()),
            Self::Raw(message) => serde_json::to_string(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_error_message_shape() {
        let json = serde_json::to_string(&ServerMessage::error("INVALID_MESSAGE", "bad")).unwrap();
        assert_eq!(json, r#"{"type":"error","code":"INVALID_MESSAGE","message":"bad"}"#);
    }

    #[test]
    fn test_status_frame_parses_back() {
        let frame = r#"{"type":"statusMessage","status":200,"severity":"success","message":"Saved","payload":null}"#;
        let parsed: ServerMessage = serde_json::from_str(frame).unwrap();
        assert_eq!(parsed, ServerMessage::from(StatusMessage::success("Saved")));
    }

    #[test]
    fn test_outbound_text_is_passed_through() {
        let outbound = OutboundMessage::text("{\"type\":\"pong\"}");
        assert_eq!(outbound.to_json().unwrap(), "{\"type\":\"pong\"}");
        assert_eq!(
            OutboundMessage::Raw(ServerMessage::Pong).to_json().unwrap(),
            "{\"type\":\"pong\"}"
        );
    }
}
