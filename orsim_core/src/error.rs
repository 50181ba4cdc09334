//! Error types for the agent runtime.
//!
//! Two families are kept apart at the dispatch boundary:
//! - [`StepError`] is raised by domain logic and is turned into data
//!   (an `error` response) by the lifecycle.
//! - [`CoreError`] is a runtime failure (transport, JSON, configuration)
//!   and propagates to the caller with `?`.

use orsim_env::EnvError;
use thiserror::Error;

/// Runtime errors that are not domain failures.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Bus error: {0}")]
    Bus(#[from] EnvError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid reference time '{value}': {reason}")]
    ReferenceTime { value: String, reason: String },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// A failure raised by a [`StepProcessor`](crate::StepProcessor).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct StepError {
    /// Short machine-readable category (e.g. `"invalid_payload"`)
    pub kind: String,

    /// Human readable description
    pub message: String,

    /// Underlying causes, outermost first
    pub causes: Vec<String>,
}

impl StepError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Appends a cause to the chain.
    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.causes.push(cause.to_string());
        self
    }

    /// Builds a step error from any error, capturing its `source()` chain.
    pub fn from_error(kind: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut step_error = Self::new(kind, err.to_string());
        let mut source = err.source();
        while let Some(cause) = source {
            step_error.causes.push(cause.to_string());
            source = cause.source();
        }
        step_error
    }
}
