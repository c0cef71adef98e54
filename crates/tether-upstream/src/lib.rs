//! The upstream seam: everything the bridge knows about the chat-protocol
//! client library. The library itself is opaque; it is consumed through the
//! [`transport::UpstreamTransport`] trait and the [`transport::UpstreamEvent`]
//! stream, and its loosely-typed message payloads are decoded exactly once
//! into the closed [`envelope::MessageBody`] sum type.

pub mod envelope;
pub mod normalize;
pub mod process;
pub mod transport;

pub use envelope::{MediaKind, MessageBody, MessageEnvelope};
pub use normalize::normalize;
pub use process::ProcessTransport;
pub use transport::{CloseCause, UpstreamEvent, UpstreamLink, UpstreamSender, UpstreamTransport};
