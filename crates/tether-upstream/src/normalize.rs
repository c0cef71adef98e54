//! Turns one upstream envelope into a canonical inbound message, or nothing.

use tether_core::{Address, InboundMessage};

use crate::envelope::{MessageBody, MessageEnvelope};

/// Placeholder content for voice messages; audio is not transcribed here.
pub const VOICE_PLACEHOLDER: &str = "[Voice Message]";

/// Normalize an envelope into an [`InboundMessage`].
///
/// Returns `None` for envelopes the bridge does not relay: the session's
/// own messages, status-broadcast posts, and envelopes with no extractable
/// content. `None` is not an error; such messages are silently dropped.
pub fn normalize(envelope: &MessageEnvelope) -> Option<InboundMessage> {
    // Hard filter, applied once before any extraction.
    if envelope.from_me || envelope.chat.is_status_broadcast() {
        return None;
    }

    let content = extract_content(&envelope.body)?;

    Some(InboundMessage {
        id: envelope.id.clone(),
        sender: envelope.chat.clone(),
        pn: envelope.sender_alt.clone().unwrap_or_else(Address::empty),
        content,
        timestamp: envelope.timestamp,
        is_group: envelope.chat.is_group(),
    })
}

/// Extraction precedence: plain text, extended text, tagged media caption,
/// voice placeholder. Everything else has no representable content.
fn extract_content(body: &MessageBody) -> Option<String> {
    match body {
        MessageBody::Conversation { text } | MessageBody::ExtendedText { text } => {
            if text.is_empty() {
                None
            } else {
                Some(text.clone())
            }
        }
        MessageBody::MediaCaption { media, caption } => {
            if caption.is_empty() {
                None
            } else {
                Some(format!("[{media}] {caption}"))
            }
        }
        MessageBody::Audio => Some(VOICE_PLACEHOLDER.to_string()),
        MessageBody::Unrecognized => None,
    }
}
