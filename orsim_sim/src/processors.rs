//! Demo step processors driven by the scenarios.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use orsim_core::{InboundEnvelope, StepError, StepProcessor, StepView};
use orsim_env::AgentContext;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Steps ahead an idle walker expects its next event.
const IDLE_LOOKAHEAD: i64 = 5;

/// Two-state walker (`idle` / `moving`).
///
/// Each step it leaves its current state with the probability the behavior
/// document assigns to that state's name. Randomness comes from a seeded
/// ChaCha stream so runs are reproducible.
pub struct TransitionWalker {
    rng: ChaCha8Rng,
    moving: bool,
    transitions: u64,
}

impl TransitionWalker {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            moving: false,
            transitions: 0,
        }
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    fn state_name(&self) -> &'static str {
        if self.moving {
            "moving"
        } else {
            "idle"
        }
    }
}

#[async_trait]
impl StepProcessor for TransitionWalker {
    async fn process(
        &mut self,
        view: &StepView<'_>,
        _envelope: &InboundEnvelope,
    ) -> Result<bool, StepError> {
        let from = self.state_name();
        let p = view.transition_probability(from, 0.5);
        let roll: f64 = self.rng.gen();

        if roll < p {
            self.moving = !self.moving;
            self.transitions += 1;
            view.add_step_log(format!("{from} -> {} (roll {roll:.3} < {p:.3})", self.state_name()));
            return Ok(true);
        }
        view.add_step_log(format!("stayed {from}"));
        Ok(false)
    }

    async fn estimate_next_event_time(
        &mut self,
        view: &StepView<'_>,
    ) -> Result<NaiveDateTime, StepError> {
        let clock = view.clock();
        let ahead = if self.moving { 1 } else { IDLE_LOOKAHEAD };
        Ok(clock.time_at(clock.current_step().saturating_add(ahead)))
    }

    async fn logout(&mut self) -> Result<(), StepError> {
        info!(transitions = self.transitions, "walker logged out");
        Ok(())
    }
}

/// Fails its `process` call on chosen steps, otherwise acts every step.
pub struct FaultyProcessor {
    fail_on: HashSet<i64>,
    panic_on: HashSet<i64>,
}

impl FaultyProcessor {
    pub fn new(fail_on: impl IntoIterator<Item = i64>) -> Self {
        Self {
            fail_on: fail_on.into_iter().collect(),
            panic_on: HashSet::new(),
        }
    }

    /// Also panics (rather than returning an error) on these steps.
    pub fn with_panics(mut self, panic_on: impl IntoIterator<Item = i64>) -> Self {
        self.panic_on.extend(panic_on);
        self
    }
}

#[async_trait]
impl StepProcessor for FaultyProcessor {
    async fn process(
        &mut self,
        view: &StepView<'_>,
        _envelope: &InboundEnvelope,
    ) -> Result<bool, StepError> {
        let step = view.clock().current_step();
        if self.panic_on.contains(&step) {
            panic!("injected panic at step {step}");
        }
        if self.fail_on.contains(&step) {
            return Err(StepError::new("injected_fault", format!("refusing step {step}"))
                .with_cause("fault injection"));
        }
        Ok(true)
    }

    async fn estimate_next_event_time(
        &mut self,
        view: &StepView<'_>,
    ) -> Result<NaiveDateTime, StepError> {
        let clock = view.clock();
        Ok(clock.time_at(clock.current_step().saturating_add(1)))
    }

    async fn logout(&mut self) -> Result<(), StepError> {
        Ok(())
    }
}

/// Blocks inside `process` on one step for longer than the step timeout.
///
/// The stall is measured on the context's clock and slept off in short
/// slices, so under a virtual clock the heartbeat gets to run in between.
pub struct StallingProcessor<Ctx: AgentContext> {
    context: Arc<Ctx>,
    stall_on: i64,
    stall_for: Duration,
    slice: Duration,
}

impl<Ctx: AgentContext> StallingProcessor<Ctx> {
    pub fn new(context: Arc<Ctx>, stall_on: i64, stall_for: Duration) -> Self {
        Self {
            context,
            stall_on,
            stall_for,
            slice: Duration::from_millis(100),
        }
    }

    pub fn with_slice(mut self, slice: Duration) -> Self {
        self.slice = slice;
        self
    }
}

#[async_trait]
impl<Ctx: AgentContext> StepProcessor for StallingProcessor<Ctx> {
    async fn process(
        &mut self,
        view: &StepView<'_>,
        _envelope: &InboundEnvelope,
    ) -> Result<bool, StepError> {
        let step = view.clock().current_step();
        if step != self.stall_on {
            return Ok(true);
        }

        view.add_step_log(format!("stalling for {:?}", self.stall_for));
        let until = self.context.now() + self.stall_for;
        while self.context.now() < until {
            self.context.sleep(self.slice).await;
        }
        debug!(step, "stall over");
        Ok(true)
    }

    async fn estimate_next_event_time(
        &mut self,
        view: &StepView<'_>,
    ) -> Result<NaiveDateTime, StepError> {
        let clock = view.clock();
        Ok(clock.time_at(clock.current_step().saturating_add(1)))
    }

    async fn logout(&mut self) -> Result<(), StepError> {
        Ok(())
    }
}
