//! Heartbeat monitor: detects an agent stuck mid-processing.
//!
//! The monitor runs on its own timer, independent of step cadence. It can
//! only *flag* a breach (deactivate + shutdown latch); it has no way to
//! interrupt a domain call that never returns. The latch makes the next
//! `step` response report `shutdown` and wakes the listening loop so it
//! tears down as soon as the processing schedule is free again.

use crate::state::ProcessingState;
use orsim_env::AgentContext;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a single heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// Nothing in flight
    Idle,
    /// In flight, within the timeout
    Healthy,
    /// In flight past the timeout; shutdown latched by this tick
    Breached,
    /// Shutdown already latched; polling should stop
    Stopped,
}

impl HeartbeatStatus {
    pub fn keeps_polling(self) -> bool {
        matches!(self, Self::Idle | Self::Healthy)
    }
}

pub struct HeartbeatMonitor<Ctx: AgentContext> {
    agent_id: String,
    context: Arc<Ctx>,
    state: Arc<ProcessingState>,
    step_timeout: Duration,
    period: Duration,
}

impl<Ctx: AgentContext> HeartbeatMonitor<Ctx> {
    pub fn new(
        agent_id: impl Into<String>,
        context: Arc<Ctx>,
        state: Arc<ProcessingState>,
        step_timeout: Duration,
        period: Duration,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            context,
            state,
            step_timeout,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Checks the processing state once.
    pub fn tick(&self) -> HeartbeatStatus {
        if self.state.is_shutting_down() {
            return HeartbeatStatus::Stopped;
        }
        if !self.state.is_in_flight() {
            return HeartbeatStatus::Idle;
        }

        let elapsed = self.context.now().saturating_sub(self.state.started_at());
        if elapsed <= self.step_timeout {
            return HeartbeatStatus::Healthy;
        }

        warn!(
            agent_id = %self.agent_id,
            elapsed_secs = elapsed.as_secs_f64(),
            threshold_secs = self.step_timeout.as_secs_f64(),
            "Auto shutdown: exceeded heartbeat threshold while processing"
        );
        warn!(agent_id = %self.agent_id, step_log = %self.state.step_log_json(), "step log at breach");

        self.state.deactivate();
        self.state.latch_shutdown();
        HeartbeatStatus::Breached
    }

    /// Ticks every `period` until a breach or an external shutdown.
    pub async fn run(self) {
        loop {
            self.context.sleep(self.period).await;
            let status = self.tick();
            if !status.keeps_polling() {
                debug!(agent_id = %self.agent_id, ?status, "heartbeat stopped");
                break;
            }
        }
    }
}
