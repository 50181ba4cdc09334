//! Scheduler-supplied settings consumed by the runtime.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_heartbeat_interval() -> f64 {
    5.0
}

/// Runtime settings as sent by the scheduler (`orsim_settings`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrsimSettings {
    /// Seconds of simulated time represented by one step
    #[serde(rename = "STEP_INTERVAL")]
    pub step_interval: f64,

    /// Seconds of continuous processing tolerated before a heartbeat breach
    #[serde(rename = "STEP_TIMEOUT")]
    pub step_timeout: f64,

    /// Heartbeat polling period in seconds (default: 5)
    #[serde(rename = "HEARTBEAT_INTERVAL", default = "default_heartbeat_interval")]
    pub heartbeat_interval: f64,
}

impl OrsimSettings {
    pub fn new(step_interval: f64, step_timeout: f64) -> Self {
        Self {
            step_interval,
            step_timeout,
            heartbeat_interval: default_heartbeat_interval(),
        }
    }

    /// Sets the heartbeat period.
    pub fn with_heartbeat_interval(mut self, secs: f64) -> Self {
        self.heartbeat_interval = secs;
        self
    }

    /// Rejects non-positive or non-finite values.
    pub fn validate(&self) -> Result<(), CoreError> {
        let fields = [
            ("STEP_INTERVAL", self.step_interval),
            ("STEP_TIMEOUT", self.step_timeout),
            ("HEARTBEAT_INTERVAL", self.heartbeat_interval),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(CoreError::config(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn step_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.step_timeout)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_interval)
    }
}

/// The scheduler descriptor handed to every agent it launches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSpec {
    pub id: String,
    pub orsim_settings: OrsimSettings,
}

impl SchedulerSpec {
    pub fn new(id: impl Into<String>, orsim_settings: OrsimSettings) -> Self {
        Self {
            id: id.into(),
            orsim_settings,
        }
    }

    /// Parses a scheduler descriptor from JSON and validates its settings.
    pub fn from_json(value: serde_json::Value) -> Result<Self, CoreError> {
        let spec: SchedulerSpec = serde_json::from_value(value)?;
        spec.orsim_settings.validate()?;
        Ok(spec)
    }
}
