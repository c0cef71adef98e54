//! Durable storage for the opaque credential material the client library
//! hands back on each handshake step. The format belongs to the library;
//! the bridge only stores and returns it.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential storage io: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the stored blob, or `None` when no session has been
    /// authenticated yet.
    async fn load(&self) -> Result<Option<String>, CredentialError>;
    async fn save(&self, blob: &str) -> Result<(), CredentialError>;
    /// Discards the stored blob. A no-op when nothing is stored. Called
    /// when the upstream revokes the session, so a later dial starts
    /// from a fresh authentication cycle.
    async fn clear(&self) -> Result<(), CredentialError>;
}

/// Stores the credential blob as a single file on disk.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<String>, CredentialError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, blob: &str) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, blob).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCredentialStore {
    blob: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.blob.lock().clone())
    }

    async fn save(&self, blob: &str) -> Result<(), CredentialError> {
        *self.blob.lock() = Some(blob.to_owned());
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        *self.blob.lock() = None;
        Ok(())
    }
}
