//! Controller command frames and per-connection replies.

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// A command submitted by one controller connection.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControllerCommand {
    Send { to: Address, text: String },
}

/// Reply sent to the originating controller only, never broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SendReply {
    Sent { to: Address },
    Error { error: String },
}

impl SendReply {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// Parse one controller frame.
///
/// A malformed frame or an unrecognized `type` is a protocol error owned by
/// the sending connection; the returned string becomes its error reply.
pub fn parse_command(raw: &str) -> Result<ControllerCommand, String> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|_| "unknown command type: <invalid json>".to_string())?;

    match value.get("type").and_then(|t| t.as_str()) {
        Some("send") => serde_json::from_value(value)
            .map_err(|e| format!("invalid send command: {e}")),
        other => Err(format!(
            "unknown command type: {}",
            other.unwrap_or("<missing>")
        )),
    }
}
