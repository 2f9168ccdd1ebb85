//! Outbound message frames

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel used for heartbeat frames
pub const PING_CHANNEL: &str = "$$transmit/ping";

/// The payload used when a broadcast omits one
pub fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

/// One frame written to a client stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitMessage {
    /// Channel the payload was broadcast on
    pub channel: String,

    /// Broadcast payload
    pub payload: Value,
}

impl TransmitMessage {
    /// Create a new message for a channel
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    /// The heartbeat frame
    pub fn ping() -> Self {
        Self::new(PING_CHANNEL, empty_payload())
    }

    /// Whether this is a heartbeat frame
    pub fn is_ping(&self) -> bool {
        self.channel == PING_CHANNEL
    }

    /// JSON representation, used as the SSE `data` field
    pub fn to_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
