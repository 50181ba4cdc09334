//! Error types for the ORSim environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Publish/subscribe failed (buffer full, broker rejected, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Broker cannot be reached from this session
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    /// Session was already disconnected
    #[error("Session disconnected")]
    Disconnected,
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(who: impl std::fmt::Display) -> Self {
        Self::Unreachable(who.to_string())
    }
}
