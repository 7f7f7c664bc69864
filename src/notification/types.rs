use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identity addressed by notifications (derived from an account id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(String);

impl RecipientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecipientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecipientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Uuid> for RecipientId {
    fn from(account_id: Uuid) -> Self {
        Self(account_id.to_string())
    }
}

/// Name of a broker channel scoped to a notification category
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ChannelName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Alert severity, serialized by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Success,
    Info,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Success => "success",
            Severity::Info => "info",
            Severity::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status information pushed to the frontend.
///
/// The same shape travels over the broker and over the WebSocket push, so
/// field names here are part of the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: i64,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<Uuid>,
}

impl StatusMessage {
    pub fn new(status: i64, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            status,
            severity,
            message: message.into(),
            payload: None,
            error_code: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(200, Severity::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(200, Severity::Info, message)
    }

    pub fn warning(status: i64, message: impl Into<String>) -> Self {
        Self::new(status, Severity::Warning, message)
    }

    pub fn error(status: i64, message: impl Into<String>) -> Self {
        Self::new(status, Severity::Error, message)
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error_code(mut self, error_code: Uuid) -> Self {
        self.error_code = Some(error_code);
        self
    }
}

/// Broker envelope routing a status message to one recipient over a shared channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub recipient: RecipientId,
    pub status: StatusMessage,
}

impl Envelope {
    pub fn new(recipient: RecipientId, status: StatusMessage) -> Self {
        Self { recipient, status }
    }
}
