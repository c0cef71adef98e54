//! Controller command processing. Replies go to the originating
//! connection only; the shared event stream never carries them.

use std::sync::Arc;

use tokio::sync::mpsc;

use tether_core::{parse_command, ControllerCommand, SendReply};
use tether_session::SessionManager;

use crate::controller::{ControllerId, ControllerRegistry};

/// Drain controller frames until the channel closes.
pub async fn process_commands(
    mut rx: mpsc::Receiver<(ControllerId, String)>,
    session: Arc<SessionManager>,
    registry: Arc<ControllerRegistry>,
) {
    while let Some((controller_id, raw)) = rx.recv().await {
        let reply = handle_frame(&session, &raw).await;
        if let Ok(frame) = serde_json::to_string(&reply) {
            registry.send_to(&controller_id, frame);
        }
    }
    tracing::debug!("command channel closed");
}

async fn handle_frame(session: &SessionManager, raw: &str) -> SendReply {
    let command = match parse_command(raw) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!(error = %e, "rejected controller frame");
            return SendReply::error(e);
        }
    };

    match command {
        ControllerCommand::Send { to, text } => match session.send(&to, &text).await {
            Ok(()) => SendReply::Sent { to },
            Err(e) => {
                tracing::warn!(to = %to, error = %e, "relay send failed");
                SendReply::error(e.to_string())
            }
        },
    }
}
