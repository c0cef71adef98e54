use std::fmt;

use serde::{Deserialize, Serialize};
use tether_core::Address;

/// One message envelope as delivered by the upstream client library.
///
/// Decoded at the transport boundary; nothing past this point probes raw
/// protocol payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    /// The conversation address (user chat or group).
    pub chat: Address,
    /// Alternate (phone-based) address for the sender, when the network
    /// exposes one alongside the primary identity.
    #[serde(default)]
    pub sender_alt: Option<Address>,
    /// Whether this session's own account authored the message.
    #[serde(default)]
    pub from_me: bool,
    /// Epoch seconds.
    pub timestamp: i64,
    pub body: MessageBody,
}

/// Closed decoding of the protocol's per-kind message payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    /// Plain conversational text.
    Conversation { text: String },
    /// Rich/extended text: replies and link previews. Only the text
    /// survives; preview metadata is dropped by the library adapter.
    ExtendedText { text: String },
    /// Image, video, or document carrying a caption.
    MediaCaption { media: MediaKind, caption: String },
    /// Voice/audio message. Audio is not transcribed at this layer.
    Audio,
    /// Anything the adapter could not classify.
    Unrecognized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Document,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "Image"),
            Self::Video => write!(f, "Video"),
            Self::Document => write!(f, "Document"),
        }
    }
}
