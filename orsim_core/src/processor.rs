//! The domain capability the lifecycle delegates to, and the error
//! boundary around it.

use crate::behavior::Behavior;
use crate::clock::SimulationClock;
use crate::envelope::InboundEnvelope;
use crate::error::StepError;
use crate::identity::AgentIdentity;
use crate::response::{DispatchStage, FailureDetails};
use crate::state::ProcessingState;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::SystemTime;

/// Domain logic of one agent variant.
///
/// The lifecycle owns a `StepProcessor` rather than being one: identity,
/// clock and behavior stay in the runtime and are lent to the processor
/// through a [`StepView`] for the duration of each call.
#[async_trait]
pub trait StepProcessor: Send + 'static {
    /// Performs one step of domain logic. Returns whether the agent
    /// actually acted this step.
    async fn process(
        &mut self,
        view: &StepView<'_>,
        envelope: &InboundEnvelope,
    ) -> Result<bool, StepError>;

    /// When this agent next expects to act.
    async fn estimate_next_event_time(
        &mut self,
        view: &StepView<'_>,
    ) -> Result<NaiveDateTime, StepError>;

    /// Releases domain-held resources. Called exactly once, at teardown.
    async fn logout(&mut self) -> Result<(), StepError>;
}

/// Read-only window on the agent handed to a [`StepProcessor`].
pub struct StepView<'a> {
    identity: &'a AgentIdentity,
    clock: &'a SimulationClock,
    behavior: &'a Behavior,
    state: &'a ProcessingState,
    wall_clock: &'a (dyn Fn() -> SystemTime + Send + Sync),
}

impl<'a> StepView<'a> {
    pub fn new(
        identity: &'a AgentIdentity,
        clock: &'a SimulationClock,
        behavior: &'a Behavior,
        state: &'a ProcessingState,
        wall_clock: &'a (dyn Fn() -> SystemTime + Send + Sync),
    ) -> Self {
        Self {
            identity,
            clock,
            behavior,
            state,
            wall_clock,
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        self.identity
    }

    pub fn clock(&self) -> &SimulationClock {
        self.clock
    }

    pub fn behavior(&self) -> &Behavior {
        self.behavior
    }

    pub fn current_time(&self) -> NaiveDateTime {
        self.clock.current_time()
    }

    /// See [`Behavior::transition_probability`].
    pub fn transition_probability(&self, condition: &str, default: f64) -> f64 {
        self.behavior.transition_probability(condition, default)
    }

    /// Appends a line to the step log dumped on heartbeat breach.
    pub fn add_step_log(&self, message: impl Into<String>) {
        let at: DateTime<Utc> = (self.wall_clock)().into();
        self.state.add_step_log(at, message);
    }
}

/// Runs one domain call, converting both `Err` and panics into
/// [`FailureDetails`].
pub async fn guarded<T, F>(stage: DispatchStage, call: F) -> Result<T, FailureDetails>
where
    F: Future<Output = Result<T, StepError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(FailureDetails::from_step_error(stage, err)),
        Err(panic) => Err(FailureDetails::panicked(stage, panic.as_ref())),
    }
}
