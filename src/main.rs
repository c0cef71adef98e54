use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use tether_session::{FileCredentialStore, SessionManager};
use tether_upstream::ProcessTransport;

/// Protocol bridge: one upstream chat session, many controller sockets.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about)]
struct Args {
    /// Port the controller WebSocket server listens on.
    #[arg(long, env = "TETHER_PORT", default_value_t = 3001)]
    port: u16,

    /// Path to the persisted session credentials.
    #[arg(long, env = "TETHER_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Upstream client-library sidecar command, e.g. "node client.js".
    #[arg(long, env = "TETHER_UPSTREAM_CMD")]
    upstream_cmd: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let credentials_path = match args.credentials {
        Some(path) => path,
        None => home_dir().join(".tether").join("credentials.json"),
    };
    tracing::info!(path = %credentials_path.display(), "using credential store");

    let command: Vec<String> = args
        .upstream_cmd
        .split_whitespace()
        .map(str::to_owned)
        .collect();
    if command.is_empty() {
        anyhow::bail!("upstream command is empty");
    }

    let session = SessionManager::new(
        Arc::new(ProcessTransport::new(command)),
        Arc::new(FileCredentialStore::new(credentials_path)),
    );

    let config = tether_server::ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let handle = tether_server::start(config, Arc::clone(&session))
        .await
        .context("failed to start bridge server")?;
    tracing::info!(port = handle.port, "tether ready");

    if let Err(e) = session.connect().await {
        // Non-fatal: the reconnect schedule keeps trying, and controllers
        // can observe the session state over /health.
        tracing::warn!(error = %e, "initial upstream connect failed");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
