//! Event interface and connect/send seam for the upstream client library.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use tether_core::{Address, SessionError};

use crate::envelope::MessageEnvelope;

/// Events the client library reports for the single upstream session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UpstreamEvent {
    /// A fresh authentication token (scannable code) was issued. A new
    /// challenge may replace a pending one at any time.
    AuthChallenge { token: String },
    /// Handshake completed; the session is live.
    Open,
    /// Updated credential material to persist for later resumption.
    Credentials { blob: String },
    Message(MessageEnvelope),
    /// The transport closed. The cause decides whether the session is
    /// eligible for automatic reconnection.
    Closed { cause: CloseCause },
}

/// Why the upstream transport closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CloseCause {
    /// The upstream explicitly revoked the session. Requires fresh
    /// authentication; never retried automatically.
    LoggedOut,
    /// Network error, timeout, or any other non-logout failure.
    ConnectionLost { detail: String },
    /// Server-initiated restart; transient.
    ServerRestart,
}

impl CloseCause {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// A dialed upstream session: the send half plus its event stream.
pub struct UpstreamLink {
    pub sender: Arc<dyn UpstreamSender>,
    pub events: mpsc::Receiver<UpstreamEvent>,
}

impl std::fmt::Debug for UpstreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamLink").finish_non_exhaustive()
    }
}

/// Dials the client library. One live link at a time; the caller owns that
/// invariant.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn connect(&self, credentials: Option<String>) -> Result<UpstreamLink, SessionError>;
}

/// Outbound half of a live upstream session.
#[async_trait]
pub trait UpstreamSender: Send + Sync {
    async fn send_text(&self, to: &Address, text: &str) -> Result<(), SessionError>;
    async fn close(&self);
}
