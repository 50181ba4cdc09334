//! Scenario runner - drives a population of agents through a run.

use crate::bus::{BrokerStats, InMemoryBroker};
use crate::context::SimContext;
use crate::error::SimError;
use crate::processors::{FaultyProcessor, StallingProcessor, TransitionWalker};
use crate::scenarios::ScenarioId;
use crate::scheduler::{BarrierReport, LocalScheduler};

use orsim_core::{
    AgentConfig, AgentIdentity, Behavior, CoreError, DispatchStage, OrsimAgent, OrsimSettings,
    ResponseAction, SchedulerSpec, StepProcessor,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Step at which the faulty/stalling agent misbehaves.
const FAULT_STEP: i64 = 2;

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Steps broadcast, excluding init and shutdown
    pub steps_run: i64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub responses: usize,
    pub completed: usize,
    pub errors: usize,
    pub shutdowns: usize,
    pub init_errors: usize,
    /// Steps where some agent acted
    pub active_steps: usize,
    pub timed_out_barriers: usize,
    pub stale_responses: usize,
    pub broker: BrokerStats,
    pub elapsed_ms: u64,
}

impl ScenarioMetrics {
    fn record(&mut self, report: &BarrierReport) {
        self.responses += report.responses.len();
        self.completed += report.count(ResponseAction::Completed);
        self.errors += report.count(ResponseAction::Error);
        self.shutdowns += report.count(ResponseAction::Shutdown);
        self.init_errors += report.count(ResponseAction::InitError);
        if report.responses.iter().any(|r| r.did_step) {
            self.active_steps += 1;
        }
        if report.timed_out {
            self.timed_out_barriers += 1;
        }
        self.stale_responses += report.stale;
    }
}

/// Knobs shared by every scenario.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub seed: u64,
    pub num_agents: usize,
    pub steps: i64,
    pub settings: OrsimSettings,
    /// Real-time bound on each response barrier
    pub barrier_timeout: Duration,
    pub reference_time: String,
    pub run_id: String,
    pub scheduler_id: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_agents: 4,
            steps: 5,
            settings: OrsimSettings::new(60.0, 10.0).with_heartbeat_interval(0.5),
            barrier_timeout: Duration::from_secs(2),
            reference_time: "20240101000000".to_string(),
            run_id: "sim-run".to_string(),
            scheduler_id: "local".to_string(),
        }
    }
}

/// One launched agent task.
struct AgentHandle {
    unique_id: String,
    task: JoinHandle<Result<(), CoreError>>,
}

/// Runs fault scenarios against in-process agents.
pub struct ScenarioRunner {
    config: RunnerConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> Result<ScenarioResult, SimError> {
        info!(
            "Starting scenario: {} (seed={}, agents={})",
            scenario.name(),
            self.config.seed,
            self.config.num_agents
        );
        let started = Instant::now();

        let broker = InMemoryBroker::new();
        let scheduler = LocalScheduler::connect(
            &broker,
            &self.config.run_id,
            &self.config.scheduler_id,
            self.config.barrier_timeout,
        )
        .await?;

        if scenario == ScenarioId::Isolated {
            let username = self.identity(0).credentials().username;
            broker.controller().isolate(username);
        }

        let mut handles = Vec::with_capacity(self.config.num_agents);
        for index in 0..self.config.num_agents {
            handles.push(self.launch(scenario, index, &broker)?);
        }

        let mut metrics = ScenarioMetrics::default();
        let mut checks = Checks::default();

        let expected_ready = match scenario {
            ScenarioId::Isolated => self.config.num_agents.saturating_sub(1),
            _ => self.config.num_agents,
        };
        let ready = scheduler.await_ready(0, expected_ready).await;
        metrics.record(&ready);
        checks.require(
            ready.count(ResponseAction::Ready) == expected_ready,
            format!("{} of {expected_ready} agents ready", ready.count(ResponseAction::Ready)),
        );

        let mut alive: BTreeSet<String> = ready.agent_ids().into_iter().map(str::to_string).collect();

        for step in 1..=self.config.steps {
            let report = scheduler.step(step, alive.len()).await?;
            metrics.record(&report);
            self.check_step(scenario, &report, &alive, &mut checks);

            for record in &report.responses {
                if record.action == ResponseAction::Shutdown {
                    alive.remove(&record.agent_id);
                }
            }
        }

        let final_step = self.config.steps + 1;
        let farewell = scheduler.shutdown(final_step, alive.len()).await?;
        metrics.record(&farewell);
        checks.require(
            farewell.count(ResponseAction::Shutdown) == alive.len(),
            format!(
                "{} of {} agents acknowledged shutdown",
                farewell.count(ResponseAction::Shutdown),
                alive.len()
            ),
        );
        scheduler.disconnect().await;

        for handle in handles {
            self.join(scenario, handle, &mut checks).await?;
        }

        metrics.broker = broker.stats();
        metrics.elapsed_ms = started.elapsed().as_millis() as u64;
        checks.require(
            metrics.timed_out_barriers == 0,
            format!("{} barriers timed out", metrics.timed_out_barriers),
        );

        let failure_reason = checks.failure();
        if let Some(reason) = &failure_reason {
            warn!(scenario = %scenario, reason = %reason, "scenario failed");
        }

        Ok(ScenarioResult {
            scenario,
            seed: self.config.seed,
            passed: failure_reason.is_none(),
            steps_run: self.config.steps,
            failure_reason,
            metrics,
        })
    }

    fn identity(&self, index: usize) -> AgentIdentity {
        AgentIdentity::new(
            format!("agent-{index:03}"),
            self.config.run_id.clone(),
            self.config.scheduler_id.clone(),
        )
    }

    fn agent_config(&self, index: usize) -> AgentConfig {
        AgentConfig {
            unique_id: self.identity(index).unique_id().to_string(),
            run_id: self.config.run_id.clone(),
            reference_time: self.config.reference_time.clone(),
            init_time_step: 0,
            scheduler: SchedulerSpec::new(self.config.scheduler_id.clone(), self.config.settings.clone()),
            behavior: Behavior::from_rules([("idle", 0.3), ("moving", 0.6)]),
        }
    }

    /// Chooses the processor for agent `index` and starts it.
    fn launch(
        &self,
        scenario: ScenarioId,
        index: usize,
        broker: &InMemoryBroker,
    ) -> Result<AgentHandle, SimError> {
        let seed = self.config.seed.wrapping_add(index as u64);
        let context = SimContext::shared();

        match (scenario, index) {
            (ScenarioId::Faulty, 0) => {
                let processor = FaultyProcessor::new([FAULT_STEP]).with_panics([FAULT_STEP + 1]);
                self.spawn_agent(index, processor, context, broker)
            }
            (ScenarioId::Stall, 0) => {
                let stall_for = self.config.settings.step_timeout_duration() * 3;
                let processor = StallingProcessor::new(Arc::clone(&context), FAULT_STEP, stall_for);
                self.spawn_agent(index, processor, context, broker)
            }
            _ => self.spawn_agent(index, TransitionWalker::new(seed), context, broker),
        }
    }

    fn spawn_agent<P: StepProcessor + Sync>(
        &self,
        index: usize,
        processor: P,
        context: Arc<SimContext>,
        broker: &InMemoryBroker,
    ) -> Result<AgentHandle, SimError> {
        let config = self.agent_config(index);
        let bus = Arc::new(broker.connect(&self.identity(index).credentials()));
        let mut agent = OrsimAgent::new(config, processor, context, bus)?;
        let unique_id = agent.identity().unique_id().to_string();

        debug!(agent_id = %unique_id, "launching agent");
        let task = tokio::spawn(async move { agent.run().await });
        Ok(AgentHandle { unique_id, task })
    }

    fn check_step(
        &self,
        scenario: ScenarioId,
        report: &BarrierReport,
        alive: &BTreeSet<String>,
        checks: &mut Checks,
    ) {
        let step = report.time_step;
        checks.require(
            report.responses.len() == alive.len(),
            format!("step {step}: {} of {} responses", report.responses.len(), alive.len()),
        );

        let subject = self.identity(0);
        let subject_id = subject.unique_id();
        let subject_action = report.response_for(subject_id).map(|r| r.action);

        for record in &report.responses {
            if record.agent_id == subject_id {
                continue;
            }
            checks.require(
                record.action == ResponseAction::Completed,
                format!("step {step}: {} answered {:?}", record.agent_id, record.action),
            );
        }

        match scenario {
            ScenarioId::Lockstep | ScenarioId::Isolated => {
                if alive.contains(subject_id) {
                    checks.require(
                        subject_action == Some(ResponseAction::Completed),
                        format!("step {step}: {subject_id} answered {subject_action:?}"),
                    );
                }
            }
            ScenarioId::Faulty => {
                let expected_stage = match step {
                    FAULT_STEP => Some(("injected_fault", DispatchStage::Process)),
                    s if s == FAULT_STEP + 1 => Some(("panic", DispatchStage::Process)),
                    _ => None,
                };
                let record = report.response_for(subject_id);
                match (expected_stage, record) {
                    (Some((kind, stage)), Some(record)) => {
                        let failure = record.failure();
                        checks.require(
                            record.action == ResponseAction::Error
                                && !record.did_step
                                && failure.as_ref().map(|f| (f.kind.as_str(), f.stage)) == Some((kind, stage)),
                            format!("step {step}: expected {kind} error from {subject_id}, got {record:?}"),
                        );
                    }
                    (None, Some(record)) => checks.require(
                        record.action == ResponseAction::Completed,
                        format!("step {step}: {subject_id} did not recover ({:?})", record.action),
                    ),
                    (_, None) => checks.require(false, format!("step {step}: {subject_id} silent")),
                }
            }
            ScenarioId::Stall => {
                if step < FAULT_STEP {
                    checks.require(
                        subject_action == Some(ResponseAction::Completed),
                        format!("step {step}: {subject_id} answered {subject_action:?}"),
                    );
                } else if step == FAULT_STEP {
                    checks.require(
                        subject_action == Some(ResponseAction::Shutdown),
                        format!("step {step}: stalled agent answered {subject_action:?}"),
                    );
                } else {
                    checks.require(
                        subject_action.is_none(),
                        format!("step {step}: stalled agent still answering"),
                    );
                }
            }
        }
    }

    async fn join(
        &self,
        scenario: ScenarioId,
        handle: AgentHandle,
        checks: &mut Checks,
    ) -> Result<(), SimError> {
        let outcome = tokio::time::timeout(self.config.barrier_timeout, handle.task)
            .await
            .map_err(|_| SimError::AgentTask {
                agent_id: handle.unique_id.clone(),
                reason: "did not exit after shutdown".to_string(),
            })?
            .map_err(|err| SimError::AgentTask {
                agent_id: handle.unique_id.clone(),
                reason: err.to_string(),
            })?;

        let isolated = scenario == ScenarioId::Isolated && handle.unique_id == self.identity(0).unique_id();
        match outcome {
            Ok(()) => checks.require(!isolated, format!("{} started despite isolation", handle.unique_id)),
            Err(CoreError::Bus(err)) if isolated => {
                debug!(agent_id = %handle.unique_id, error = %err, "isolated agent refused to start");
            }
            Err(err) => checks.require(false, format!("{} exited with {err}", handle.unique_id)),
        }
        Ok(())
    }
}

/// Accumulates failed assertions.
#[derive(Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn require(&mut self, ok: bool, message: String) {
        if !ok {
            self.failures.push(message);
        }
    }

    fn failure(&self) -> Option<String> {
        if self.failures.is_empty() {
            None
        } else {
            Some(self.failures.join("; "))
        }
    }
}
