//! Harness-level errors.

use orsim_core::CoreError;
use orsim_env::EnvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Bus(#[from] EnvError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("agent task {agent_id} failed: {reason}")]
    AgentTask { agent_id: String, reason: String },
}
