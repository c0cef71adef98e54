pub mod credentials;
pub mod manager;

pub use credentials::{CredentialError, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use manager::{SessionManager, SessionState, RECONNECT_DELAY};
