//! Minimal lockstep scheduler: broadcasts control envelopes and waits on a
//! response barrier.

use crate::bus::{BusClient, InMemoryBroker};
use crate::error::SimError;
use orsim_core::identity::{agent_topic, scheduler_topic};
use orsim_core::{InboundEnvelope, ResponseAction, ResponseRecord};
use orsim_env::{AgentCredentials, MessageBus};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Responses gathered for one time step.
#[derive(Debug, Clone, Default)]
pub struct BarrierReport {
    pub time_step: i64,
    pub responses: Vec<ResponseRecord>,
    /// Responses that arrived for an earlier step
    pub stale: usize,
    /// The barrier gave up before every expected agent answered
    pub timed_out: bool,
}

impl BarrierReport {
    pub fn count(&self, action: ResponseAction) -> usize {
        self.responses.iter().filter(|r| r.action == action).count()
    }

    pub fn response_for(&self, agent_id: &str) -> Option<&ResponseRecord> {
        self.responses.iter().find(|r| r.agent_id == agent_id)
    }

    /// Agents that answered this step.
    pub fn agent_ids(&self) -> HashSet<&str> {
        self.responses.iter().map(|r| r.agent_id.as_str()).collect()
    }
}

/// Drives one run/scheduler pair over an [`InMemoryBroker`].
pub struct LocalScheduler {
    client: BusClient,
    agent_topic: String,
    barrier_timeout: Duration,
}

impl LocalScheduler {
    /// Connects and subscribes to the scheduler topic of `run_id/scheduler_id`.
    pub async fn connect(
        broker: &InMemoryBroker,
        run_id: &str,
        scheduler_id: &str,
        barrier_timeout: Duration,
    ) -> Result<Self, SimError> {
        let credentials =
            AgentCredentials::new(format!("{run_id}_{scheduler_id}_scheduler"), "secret_password");
        let client = broker.connect(&credentials);
        client.subscribe(&[scheduler_topic(run_id, scheduler_id)]).await?;

        Ok(Self {
            client,
            agent_topic: agent_topic(run_id, scheduler_id),
            barrier_timeout,
        })
    }

    /// Waits for the `ready` (or `init_error`) of `expected` agents.
    pub async fn await_ready(&self, init_time_step: i64, expected: usize) -> BarrierReport {
        self.await_responses(init_time_step, expected).await
    }

    /// Broadcasts a `step` envelope and waits for its barrier.
    pub async fn step(&self, time_step: i64, expected: usize) -> Result<BarrierReport, SimError> {
        self.broadcast(&InboundEnvelope::step(time_step)).await?;
        Ok(self.await_responses(time_step, expected).await)
    }

    /// Broadcasts a `shutdown` envelope and waits for its barrier.
    pub async fn shutdown(&self, time_step: i64, expected: usize) -> Result<BarrierReport, SimError> {
        self.broadcast(&InboundEnvelope::shutdown(time_step)).await?;
        Ok(self.await_responses(time_step, expected).await)
    }

    /// Publishes any envelope on the agent control topic.
    pub async fn broadcast(&self, envelope: &InboundEnvelope) -> Result<(), SimError> {
        debug!(action = ?envelope.action, time_step = envelope.time_step, "broadcasting");
        self.client.publish(&self.agent_topic, envelope.encode()?).await?;
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.client.disconnect().await;
    }

    /// Gathers one response per agent for `time_step`, up to `expected`
    /// agents or the barrier timeout. Responses for other steps are counted
    /// as stale and skipped.
    pub async fn await_responses(&self, time_step: i64, expected: usize) -> BarrierReport {
        let mut report = BarrierReport {
            time_step,
            ..BarrierReport::default()
        };
        let mut answered = HashSet::new();
        let deadline = Instant::now() + self.barrier_timeout;

        while answered.len() < expected {
            let message = match tokio::time::timeout_at(deadline, self.client.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(_) => {
                    warn!(time_step, answered = answered.len(), expected, "barrier timed out");
                    report.timed_out = true;
                    break;
                }
            };

            let record = match ResponseRecord::decode(&message.payload) {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %err, "undecodable response dropped");
                    continue;
                }
            };

            let belongs = record.time_step == time_step || record.action == ResponseAction::InitError;
            if !belongs {
                debug!(agent_id = %record.agent_id, time_step = record.time_step, "stale response");
                report.stale += 1;
                continue;
            }
            if answered.insert(record.agent_id.clone()) {
                report.responses.push(record);
            }
        }

        info!(
            time_step,
            answered = answered.len(),
            expected,
            "barrier released"
        );
        report
    }
}
