use std::sync::Arc;

use tokio::sync::broadcast;

use tether_core::BridgeEvent;

use crate::controller::ControllerRegistry;

/// Subscribes to the session's event broadcast and fans every event out
/// to all connected controllers, serialized once per event.
pub struct EventBridge {
    registry: Arc<ControllerRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ControllerRegistry>) -> Self {
        Self { registry }
    }

    /// Start the bridge task. It runs until the event channel closes.
    pub fn start(&self, mut rx: broadcast::Receiver<BridgeEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(frame) => {
                            let delivered = registry.broadcast_all(&frame);
                            tracing::debug!(
                                event_type = event.event_type(),
                                delivered,
                                "event relayed"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to serialize bridge event");
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Create an event bridge wired to a broadcast receiver.
pub fn create_bridge(
    registry: Arc<ControllerRegistry>,
    rx: broadcast::Receiver<BridgeEvent>,
) -> tokio::task::JoinHandle<()> {
    EventBridge::new(registry).start(rx)
}
