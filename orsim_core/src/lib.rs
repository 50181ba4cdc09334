//! ORSim Core - lifecycle and fault-detection runtime for lockstep agents
//!
//! Each agent process advances in lockstep with a remote scheduler:
//! 1. **Clock**: integer steps map onto absolute simulation time without drift
//! 2. **Lifecycle**: every control envelope gets exactly one response, whatever
//!    the domain logic does
//! 3. **Heartbeat**: an agent stuck mid-step flags itself for shutdown so the
//!    scheduler's step barrier is not held hostage

pub mod agent_runtime;
pub mod behavior;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod processor;
pub mod publisher;
pub mod response;
pub mod router;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types for convenience
pub use agent_runtime::{AgentConfig, Handler, OrsimAgent};
pub use behavior::Behavior;
pub use clock::{parse_reference_time, time_to_str, SimulationClock};
pub use config::{OrsimSettings, SchedulerSpec};
pub use envelope::{ControlAction, InboundEnvelope};
pub use error::{CoreError, StepError};
pub use heartbeat::{HeartbeatMonitor, HeartbeatStatus};
pub use identity::AgentIdentity;
pub use processor::{StepProcessor, StepView};
pub use publisher::ResponsePublisher;
pub use response::{DispatchStage, FailureDetails, ResponseAction, ResponseRecord};
pub use router::MessageRouter;
pub use state::{LifecyclePhase, ProcessingState};
