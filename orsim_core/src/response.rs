//! Response records sent back to the scheduler.

use crate::error::StepError;
use serde::{Deserialize, Serialize};

/// Action reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    Ready,
    Completed,
    Shutdown,
    Error,
    InitError,
}

/// Where in the dispatch a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStage {
    Process,
    EstimateNextEventTime,
    Logout,
    /// The envelope itself could not be honoured
    Protocol,
    /// The agent could not reach the bus during startup
    Startup,
}

/// Structured failure description carried in the `details` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetails {
    pub stage: DispatchStage,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl FailureDetails {
    pub fn new(stage: DispatchStage, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    pub fn from_step_error(stage: DispatchStage, err: StepError) -> Self {
        Self {
            stage,
            kind: err.kind,
            message: err.message,
            causes: err.causes,
        }
    }

    /// Details for a domain call that panicked instead of returning.
    pub fn panicked(stage: DispatchStage, panic: &(dyn std::any::Any + Send)) -> Self {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(stage, "panic", message)
    }

    /// JSON rendering used on the wire.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{}: {}", self.kind, self.message))
    }
}

impl std::fmt::Display for FailureDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} failed ({}): {}", self.stage, self.kind, self.message)
    }
}

/// One response per handled envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub agent_id: String,
    pub time_step: i64,
    pub action: ResponseAction,
    pub did_step: bool,
    /// Seconds spent handling the envelope
    #[serde(rename = "run_time")]
    pub run_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ResponseRecord {
    pub fn new(
        agent_id: impl Into<String>,
        time_step: i64,
        action: ResponseAction,
        did_step: bool,
        run_time_seconds: f64,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            time_step,
            action,
            did_step,
            run_time_seconds,
            details: None,
        }
    }

    /// An `error` response; `did_step` is always false.
    pub fn error(
        agent_id: impl Into<String>,
        time_step: i64,
        run_time_seconds: f64,
        failure: &FailureDetails,
    ) -> Self {
        Self {
            details: Some(failure.to_json_string()),
            ..Self::new(agent_id, time_step, ResponseAction::Error, false, run_time_seconds)
        }
    }

    /// Parses the structured failure back out of `details`.
    pub fn failure(&self) -> Option<FailureDetails> {
        self.details
            .as_deref()
            .and_then(|d| serde_json::from_str(d).ok())
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
