use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use tether_session::SessionManager;

use crate::commands;
use crate::controller::{self, ControllerId, ControllerRegistry};
use crate::event_bridge;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionManager>,
    pub registry: Arc<ControllerRegistry>,
    pub command_tx: mpsc::Sender<(ControllerId, String)>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. A bind failure is fatal; there is no
/// point running the bridge if controllers cannot reach it.
pub async fn start(
    config: ServerConfig,
    session: Arc<SessionManager>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ControllerRegistry::new(config.max_send_queue));

    let bridge_handle = event_bridge::create_bridge(Arc::clone(&registry), session.subscribe());

    let cleanup_handle = controller::start_cleanup_task(
        Arc::clone(&registry),
        std::time::Duration::from_secs(60),
    );

    let (command_tx, command_rx) = mpsc::channel::<(ControllerId, String)>(1024);
    let command_handle = tokio::spawn(commands::process_commands(
        command_rx,
        Arc::clone(&session),
        Arc::clone(&registry),
    ));

    let app_state = AppState {
        session: Arc::clone(&session),
        registry: Arc::clone(&registry),
        command_tx,
    };

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "bridge server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        session,
        registry,
        server: server_handle,
        bridge: bridge_handle,
        commands: command_handle,
        cleanup: cleanup_handle,
    })
}

/// Handle returned by `start()`. Keeps the background tasks alive and
/// drives orderly shutdown.
pub struct ServerHandle {
    pub port: u16,
    session: Arc<SessionManager>,
    registry: Arc<ControllerRegistry>,
    server: tokio::task::JoinHandle<()>,
    bridge: tokio::task::JoinHandle<()>,
    commands: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Close every controller connection, stop the background tasks, and
    /// tear down the upstream session.
    pub async fn shutdown(self) {
        tracing::info!("shutting down bridge server");
        self.registry.close_all();
        self.server.abort();
        self.bridge.abort();
        self.commands.abort();
        self.cleanup.abort();
        self.session.disconnect().await;
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new controller connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (controller_id, rx) = state.registry.register();
    tracing::info!(controller_id = %controller_id, "controller connected");

    controller::handle_ws_connection(
        socket,
        controller_id,
        rx,
        state.registry,
        state.command_tx,
    )
    .await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session_state = state.session.state().await;
    axum::Json(serde_json::json!({
        "status": "ok",
        "session": session_state.as_str(),
        "controllers": state.registry.count(),
    }))
}
