//! Common types for the ORSim environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a bus session.
///
/// Several sessions may authenticate with the same credentials, so the
/// broker keys subscriptions by session rather than by user name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random SessionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Credentials used to open a bus session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCredentials {
    pub username: String,
    pub password: String,
}

impl AgentCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A message as delivered by the bus: topic plus opaque payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Topic the message was published on
    pub topic: String,

    /// Raw payload (JSON for ORSim control traffic)
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Creates a new message.
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
