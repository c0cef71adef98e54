use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CONTROLLER_TIMEOUT: Duration = Duration::from_secs(90);

/// Unique controller-connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ControllerId(pub String);

impl Default for ControllerId {
    fn default() -> Self {
        Self(format!("ctrl_{}", Uuid::now_v7()))
    }
}

impl ControllerId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ControllerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One connected controller process.
pub struct Controller {
    pub id: ControllerId,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_pong: AtomicU64,
}

impl Controller {
    fn new(id: ControllerId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CONTROLLER_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected controllers. Every controller is an equal
/// peer; bridge events fan out to all of them.
pub struct ControllerRegistry {
    controllers: DashMap<ControllerId, Arc<Controller>>,
    max_send_queue: usize,
}

impl ControllerRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            controllers: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new controller and return its ID plus the outbound queue.
    pub fn register(&self) -> (ControllerId, mpsc::Receiver<String>) {
        let id = ControllerId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.controllers
            .insert(id.clone(), Arc::new(Controller::new(id.clone(), tx)));
        (id, rx)
    }

    /// Remove a controller by ID.
    pub fn unregister(&self, id: &ControllerId) {
        if let Some((_, controller)) = self.controllers.remove(id) {
            controller.connected.store(false, Ordering::Relaxed);
        }
    }

    /// Send a frame to one controller. A full queue drops the frame for
    /// that controller only.
    pub fn send_to(&self, id: &ControllerId, frame: String) -> bool {
        if let Some(controller) = self.controllers.get(id) {
            match controller.tx.try_send(frame) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    tracing::warn!(
                        controller_id = %id,
                        frame_len = frame.len(),
                        "send queue full, dropping frame"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        } else {
            false
        }
    }

    /// Fan one pre-serialized frame out to every connected controller.
    /// A slow or dead controller never blocks delivery to the others.
    pub fn broadcast_all(&self, frame: &str) -> usize {
        let mut delivered = 0;
        for entry in self.controllers.iter() {
            let controller = entry.value();
            if !controller.is_connected() {
                continue;
            }
            match controller.tx.try_send(frame.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        controller_id = %controller.id,
                        "send queue full, controller missed a frame"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Number of registered controllers.
    pub fn count(&self) -> usize {
        self.controllers.len()
    }

    /// Drop every controller. Closing the outbound queues ends the writer
    /// tasks, which closes the sockets.
    pub fn close_all(&self) {
        for entry in self.controllers.iter() {
            entry.value().connected.store(false, Ordering::Relaxed);
        }
        self.controllers.clear();
    }

    /// Remove controllers that stopped answering pings.
    pub fn cleanup_dead_controllers(&self) -> usize {
        let dead: Vec<ControllerId> = self
            .controllers
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.value().id.clone())
            .collect();

        let removed = dead.len();
        for id in dead {
            self.unregister(&id);
            tracing::info!(controller_id = %id, "cleaned up dead controller");
        }
        removed
    }
}

/// Drive one WebSocket connection: split into reader/writer tasks and
/// keep the link alive with periodic pings.
pub async fn handle_ws_connection(
    socket: WebSocket,
    controller_id: ControllerId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ControllerRegistry>,
    on_command: mpsc::Sender<(ControllerId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: outbound queue to socket, plus heartbeat pings.
    let writer_cid = controller_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(controller_id = %writer_cid, "sent ping");
                }
            }
        }

        if let Some(controller) = writer_registry.controllers.get(&writer_cid) {
            controller.connected.store(false, Ordering::Relaxed);
        }
    });

    // Reader task: inbound command frames to the processor, pong tracking.
    let reader_cid = controller_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_command.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Pong(_) => {
                    if let Some(controller) = reader_registry.controllers.get(&reader_cid) {
                        controller.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum replies automatically
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&controller_id);
    tracing::info!(controller_id = %controller_id, "controller disconnected");
}

/// Periodically sweep controllers that missed their pong deadline.
pub fn start_cleanup_task(
    registry: Arc<ControllerRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_controllers();
            if removed > 0 {
                tracing::info!(removed, "dead controller cleanup");
            }
        }
    })
}
