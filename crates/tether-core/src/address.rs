use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Namespace suffix the upstream network uses for group conversations.
const GROUP_SUFFIX: &str = "@g.us";

/// Reserved conversation address for broadcast/status posts.
const STATUS_BROADCAST: &str = "status@broadcast";

/// An opaque upstream address (user, group, or broadcast identity).
///
/// The bridge never interprets addresses beyond the namespace checks below;
/// everything else is passed through to controllers verbatim.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The empty address, used where the wire format requires a field
    /// that may carry no value.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this address names a group conversation.
    pub fn is_group(&self) -> bool {
        self.0.ends_with(GROUP_SUFFIX)
    }

    /// Whether this is the reserved status-broadcast address.
    pub fn is_status_broadcast(&self) -> bool {
        self.0 == STATUS_BROADCAST
    }

    /// The part before `@` (the bare user identifier).
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
