//! Child-process transport: runs the protocol client library as a sidecar
//! and speaks newline-delimited JSON over its stdio.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use tether_core::{Address, SessionError};

use crate::transport::{UpstreamEvent, UpstreamLink, UpstreamSender, UpstreamTransport};

/// Queue depth for events read off the sidecar before the pump drains them.
const EVENT_QUEUE: usize = 256;

/// Commands written to the sidecar, one JSON object per line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum SidecarCommand {
    Connect { credentials: Option<String> },
    Send { to: Address, text: String },
    Close,
}

/// Spawns the configured client-library process on every `connect()`.
pub struct ProcessTransport {
    command: Vec<String>,
}

impl ProcessTransport {
    /// `command` is the sidecar program and its arguments.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl UpstreamTransport for ProcessTransport {
    async fn connect(&self, credentials: Option<String>) -> Result<UpstreamLink, SessionError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| SessionError::ConnectFailed("no upstream command configured".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::ConnectFailed(format!("spawn {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::ConnectFailed("sidecar stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::ConnectFailed("sidecar stdout unavailable".into()))?;

        let sender = Arc::new(ProcessSender {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
        });

        sender
            .write_command(&SidecarCommand::Connect { credentials })
            .await
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        tokio::spawn(read_events(stdout, tx));

        Ok(UpstreamLink { sender, events: rx })
    }
}

/// Reads sidecar stdout line by line until EOF. Unparseable lines are
/// skipped; the event stream ending signals a closed transport to the pump.
async fn read_events(stdout: tokio::process::ChildStdout, tx: mpsc::Sender<UpstreamEvent>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<UpstreamEvent>(line) {
                    Ok(event) => {
                        debug!(event = ?event, "upstream event");
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping unparseable sidecar line"),
                }
            }
            Ok(None) => {
                debug!("sidecar stdout closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "sidecar read error");
                return;
            }
        }
    }
}

struct ProcessSender {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
}

impl ProcessSender {
    async fn write_command(&self, command: &SidecarCommand) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(command)?;
        line.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&line).await?;
        stdin.flush().await
    }
}

#[async_trait]
impl UpstreamSender for ProcessSender {
    async fn send_text(&self, to: &Address, text: &str) -> Result<(), SessionError> {
        self.write_command(&SidecarCommand::Send {
            to: to.clone(),
            text: text.to_owned(),
        })
        .await
        .map_err(|e| SessionError::SendFailed(e.to_string()))
    }

    async fn close(&self) {
        // Ask the sidecar to shut down, then make sure it does.
        let _ = self.write_command(&SidecarCommand::Close).await;
        let _ = self.child.lock().await.kill().await;
    }
}
