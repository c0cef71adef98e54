use serde::{Deserialize, Serialize};

use crate::address::Address;

/// A normalized inbound chat message, ready for relay to controllers.
///
/// Immutable once constructed. Field names follow the controller wire
/// format: `pn` is the alternate (phone-based) sender address and may be
/// empty, `sender` is the conversation address controllers reply to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub sender: Address,
    #[serde(default = "Address::empty")]
    pub pn: Address,
    pub content: String,
    /// Epoch seconds.
    pub timestamp: i64,
    #[serde(rename = "isGroup")]
    pub is_group: bool,
}

/// Projection of the session state carried on `status` frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

/// Event broadcast to every connected controller.
///
/// This is the wire representation: one JSON object per frame, tagged by
/// `type`. `Message` flattens the normalized record into the frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeEvent {
    Message(InboundMessage),
    Qr {
        qr: String,
    },
    Status {
        status: LinkStatus,
        /// Set when the disconnect was a logout and the session cannot
        /// recover without fresh authentication. Omitted on the wire when
        /// false so ordinary status frames stay minimal.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        terminal: bool,
    },
    Error {
        error: String,
    },
}

impl BridgeEvent {
    pub fn status(status: LinkStatus) -> Self {
        Self::Status {
            status,
            terminal: false,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Qr { .. } => "qr",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
        }
    }
}
