//! Inbound control envelopes sent by the scheduler.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Control actions understood by the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Init,
    Step,
    Shutdown,
    /// Any other (or missing) action value
    Unknown(String),
}

impl ControlAction {
    pub fn parse(action: Option<&str>) -> Self {
        match action {
            Some("init") => Self::Init,
            Some("step") => Self::Step,
            Some("shutdown") => Self::Shutdown,
            Some(other) => Self::Unknown(other.to_string()),
            None => Self::Unknown(String::new()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Init => "init",
            Self::Step => "step",
            Self::Shutdown => "shutdown",
            Self::Unknown(name) if name.is_empty() => "<missing>",
            Self::Unknown(name) => name,
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control message as delivered on the agent topic.
///
/// Domain specific fields are kept verbatim in `fields` for the
/// step processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Topic the envelope arrived on (not part of the wire format)
    #[serde(skip)]
    pub topic: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    pub time_step: i64,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl InboundEnvelope {
    pub fn new(action: impl Into<String>, time_step: i64) -> Self {
        Self {
            topic: String::new(),
            action: Some(action.into()),
            time_step,
            fields: Map::new(),
        }
    }

    pub fn init(time_step: i64) -> Self {
        Self::new("init", time_step)
    }

    pub fn step(time_step: i64) -> Self {
        Self::new("step", time_step)
    }

    pub fn shutdown(time_step: i64) -> Self {
        Self::new("shutdown", time_step)
    }

    /// Adds a domain field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Sets the topic the envelope is considered to have arrived on.
    pub fn on_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn control_action(&self) -> ControlAction {
        ControlAction::parse(self.action.as_deref())
    }

    /// Decodes a bus payload received on `topic`.
    pub fn decode(topic: &str, payload: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: Self = serde_json::from_slice(payload)?;
        Ok(envelope.on_topic(topic))
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
