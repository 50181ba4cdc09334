//! Agent Runtime - the per-agent lifecycle state machine.
//!
//! This module ties the pure pieces (clock, behavior, router, response
//! model) to the environment abstraction (`AgentContext`, `MessageBus`) and
//! to the domain [`StepProcessor`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         OrsimAgent                           │
//! │                                                              │
//! │  bus.recv() ─► MessageRouter ─► handle(envelope)             │
//! │                                   │ clock.advance(step)      │
//! │                                   │ guarded(processor.*)     │
//! │                                   ▼                          │
//! │                           ResponsePublisher ─► scheduler     │
//! │                                                              │
//! │  ┌──────────────────┐   atomics only   ┌──────────────────┐  │
//! │  │ ProcessingState  │◄────────────────►│ HeartbeatMonitor │  │
//! │  └──────────────────┘                  └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use orsim_core::{AgentConfig, OrsimAgent};
//! use orsim_env::TokioContext;
//!
//! let mut agent = OrsimAgent::new(config, MyProcessor::default(), TokioContext::shared(), bus)?;
//! agent.run().await?;
//! ```

use crate::behavior::Behavior;
use crate::clock::{parse_reference_time, SimulationClock};
use crate::config::{OrsimSettings, SchedulerSpec};
use crate::envelope::{ControlAction, InboundEnvelope};
use crate::error::CoreError;
use crate::heartbeat::HeartbeatMonitor;
use crate::identity::AgentIdentity;
use crate::processor::{guarded, StepProcessor, StepView};
use crate::publisher::ResponsePublisher;
use crate::response::{DispatchStage, FailureDetails, ResponseAction, ResponseRecord};
use crate::router::MessageRouter;
use crate::state::{LifecyclePhase, ProcessingState};

use chrono::NaiveDateTime;
use orsim_env::{AgentContext, BusMessage, MessageBus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything the launcher hands to a new agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub unique_id: String,
    pub run_id: String,
    /// `YYYYMMDDHHMMSS`
    pub reference_time: String,
    pub init_time_step: i64,
    pub scheduler: SchedulerSpec,
    pub behavior: Behavior,
}

/// Handlers an agent can route a topic to.
///
/// Control traffic is currently the only routed kind; extra topics added
/// with `register_control_topic` land on the same handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Scheduler control traffic (`init` / `step` / `shutdown`)
    Control,
}

enum Wake {
    Message(Option<BusMessage>),
    Shutdown,
}

/// One simulation agent.
///
/// Generic over the context and bus so the same lifecycle runs against
/// tokio + a real broker or against the simulation harness.
pub struct OrsimAgent<Ctx, Bus, P>
where
    Ctx: AgentContext,
    Bus: MessageBus,
    P: StepProcessor,
{
    identity: AgentIdentity,
    settings: OrsimSettings,
    clock: SimulationClock,
    behavior: Behavior,
    state: Arc<ProcessingState>,
    processor: P,
    context: Arc<Ctx>,
    bus: Arc<Bus>,
    publisher: ResponsePublisher<Bus>,
    router: MessageRouter<Handler>,
    next_event_time: NaiveDateTime,
    /// Last envelope received, for diagnostics
    payload_cache: Option<InboundEnvelope>,
    received_at: Duration,
    finished_at: Duration,
}

impl<Ctx, Bus, P> OrsimAgent<Ctx, Bus, P>
where
    Ctx: AgentContext,
    Bus: MessageBus,
    P: StepProcessor,
{
    /// Creates an agent positioned at `init_time_step`, listening on the
    /// control topic of its run.
    pub fn new(
        config: AgentConfig,
        processor: P,
        context: Arc<Ctx>,
        bus: Arc<Bus>,
    ) -> Result<Self, CoreError> {
        let settings = config.scheduler.orsim_settings;
        settings.validate()?;

        let reference_time = parse_reference_time(&config.reference_time)?;
        let identity = AgentIdentity::new(config.unique_id, config.run_id, config.scheduler.id);

        let mut clock = SimulationClock::new(reference_time, settings.step_interval);
        clock.advance(config.init_time_step);

        let publisher = ResponsePublisher::new(Arc::clone(&bus), identity.scheduler_topic());
        let mut router = MessageRouter::new();
        router.register(identity.agent_topic(), Handler::Control);

        Ok(Self {
            identity,
            settings,
            clock,
            behavior: config.behavior,
            state: Arc::new(ProcessingState::new()),
            processor,
            context,
            bus,
            publisher,
            router,
            next_event_time: reference_time,
            payload_cache: None,
            received_at: Duration::ZERO,
            finished_at: Duration::ZERO,
        })
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &OrsimSettings {
        &self.settings
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn behavior(&self) -> &Behavior {
        &self.behavior
    }

    /// Shared processing flags (also watched by the heartbeat).
    pub fn state(&self) -> &Arc<ProcessingState> {
        &self.state
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.state.phase()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn next_event_time(&self) -> NaiveDateTime {
        self.next_event_time
    }

    pub fn payload_cache(&self) -> Option<&InboundEnvelope> {
        self.payload_cache.as_ref()
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn current_time_str(&self) -> String {
        self.clock.current_time_str()
    }

    /// Time spent on the last handled envelope.
    pub fn last_run_time(&self) -> Duration {
        self.finished_at.saturating_sub(self.received_at)
    }

    /// Routes an additional topic to the control handler.
    pub fn register_control_topic(&mut self, topic: impl Into<String>) {
        self.router.register(topic, Handler::Control);
    }

    pub fn get_transition_probability(&self, condition: &str, default: f64) -> f64 {
        self.behavior.transition_probability(condition, default)
    }

    pub fn add_step_log(&self, message: impl Into<String>) {
        self.state.add_step_log(self.context.system_time().into(), message);
    }

    /// Builds the heartbeat monitor for this agent's state.
    pub fn heartbeat_monitor(&self) -> HeartbeatMonitor<Ctx> {
        HeartbeatMonitor::new(
            self.identity.unique_id(),
            Arc::clone(&self.context),
            Arc::clone(&self.state),
            self.settings.step_timeout_duration(),
            self.settings.heartbeat_period(),
        )
    }

    /// Subscribes, starts the heartbeat and runs the local `init` step.
    ///
    /// If the bus cannot be reached an `init_error` response is attempted
    /// once and the transport error is returned.
    pub async fn start_listening(&mut self) -> Result<(), CoreError> {
        let started = self.context.now();
        let topics = self.router.topics();

        if let Err(err) = self.bus.subscribe(&topics).await {
            error!(agent_id = %self.identity.unique_id(), error = %err, "failed to subscribe, agent cannot start");
            let failure = FailureDetails::new(DispatchStage::Startup, "bus_unreachable", err.to_string());
            let record = ResponseRecord {
                details: Some(failure.to_json_string()),
                ..ResponseRecord::new(
                    self.identity.unique_id(),
                    -1,
                    ResponseAction::InitError,
                    false,
                    self.context.now().saturating_sub(started).as_secs_f64(),
                )
            };
            if let Err(publish_err) = self.publisher.publish(&record).await {
                warn!(agent_id = %self.identity.unique_id(), error = %publish_err, "init_error response could not be delivered");
            }
            return Err(err.into());
        }

        let monitor = self.heartbeat_monitor();
        self.context.spawn("orsim-heartbeat", monitor.run());

        let init = InboundEnvelope::init(self.clock.current_step()).on_topic(self.identity.agent_topic());
        if let Err(err) = self.handle(init).await {
            error!(agent_id = %self.identity.unique_id(), error = %err, "init response could not be published");
        }
        Ok(())
    }

    /// Consumes bus messages until teardown, then disconnects.
    pub async fn listen(&mut self) -> Result<(), CoreError> {
        let bus = Arc::clone(&self.bus);
        let state = Arc::clone(&self.state);

        while !state.is_shutting_down() {
            let wake = tokio::select! {
                message = bus.recv() => Wake::Message(message),
                _ = state.shutdown_requested() => Wake::Shutdown,
            };

            match wake {
                Wake::Message(Some(message)) => {
                    if let Err(err) = self.on_receive(message).await {
                        error!(agent_id = %self.identity.unique_id(), error = %err, "response could not be published");
                    }
                }
                Wake::Message(None) => {
                    info!(agent_id = %self.identity.unique_id(), "bus session closed");
                    break;
                }
                Wake::Shutdown => {}
            }
        }

        self.shutdown().await;
        self.stop_listening().await;
        Ok(())
    }

    /// `start_listening` followed by `listen`.
    pub async fn run(&mut self) -> Result<(), CoreError> {
        self.start_listening().await?;
        self.listen().await
    }

    pub async fn stop_listening(&self) {
        self.bus.disconnect().await;
    }

    /// Decodes and routes one bus message.
    ///
    /// Unregistered topics and undecodable payloads are logged and dropped.
    pub async fn on_receive(&mut self, message: BusMessage) -> Result<Option<ResponseRecord>, CoreError> {
        match self.router.dispatch(&message.topic).copied() {
            Some(Handler::Control) => self.on_control(message).await,
            None => Ok(None),
        }
    }

    async fn on_control(&mut self, message: BusMessage) -> Result<Option<ResponseRecord>, CoreError> {
        let envelope = match InboundEnvelope::decode(&message.topic, &message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(agent_id = %self.identity.unique_id(), topic = %message.topic, error = %err, "dropping undecodable payload");
                return Ok(None);
            }
        };

        debug!(agent_id = %self.identity.unique_id(), action = ?envelope.action, "received control message");
        let response = self.handle(envelope).await;
        debug!(
            agent_id = %self.identity.unique_id(),
            time_step = self.clock.current_step(),
            runtime_secs = self.last_run_time().as_secs_f64(),
            "message handled"
        );
        response
    }

    /// Handles one control envelope and publishes exactly one response.
    ///
    /// Domain failures come back as an `error` record; `Err` is reserved
    /// for the response not reaching the bus. Returns `Ok(None)` once the
    /// agent has been torn down.
    pub async fn handle(&mut self, envelope: InboundEnvelope) -> Result<Option<ResponseRecord>, CoreError> {
        if self.state.is_torn_down() {
            debug!(agent_id = %self.identity.unique_id(), action = ?envelope.action, "agent shut down, ignoring envelope");
            return Ok(None);
        }

        self.received_at = self.context.now();
        self.state.begin_processing(self.received_at);
        let action = envelope.control_action();
        self.add_step_log(format!("handling {action}"));

        self.clock.advance(envelope.time_step);

        let outcome = match &action {
            ControlAction::Init => self.dispatch(&envelope).await.map(|did_step| (ResponseAction::Ready, did_step)),
            ControlAction::Step => self.dispatch(&envelope).await.map(|did_step| {
                let action = if self.state.is_shutting_down() {
                    ResponseAction::Shutdown
                } else {
                    ResponseAction::Completed
                };
                (action, did_step)
            }),
            ControlAction::Shutdown => Ok((ResponseAction::Shutdown, true)),
            ControlAction::Unknown(_) => Err(FailureDetails::new(
                DispatchStage::Protocol,
                "unknown_action",
                format!("unrecognized control action '{action}'"),
            )),
        };
        self.payload_cache = Some(envelope);

        let run_time = self.context.now().saturating_sub(self.received_at).as_secs_f64();
        let record = match outcome {
            Ok((response_action, did_step)) => ResponseRecord::new(
                self.identity.unique_id(),
                self.clock.current_step(),
                response_action,
                did_step,
                run_time,
            ),
            Err(failure) => {
                warn!(agent_id = %self.identity.unique_id(), time_step = self.clock.current_step(), %failure, "step failed");
                ResponseRecord::error(self.identity.unique_id(), self.clock.current_step(), run_time, &failure)
            }
        };

        let published = self.publisher.publish(&record).await;

        if action == ControlAction::Shutdown {
            self.shutdown().await;
        }

        self.finished_at = self.context.now();
        self.state.end_processing();

        published.map(|()| Some(record))
    }

    /// Process + next-event-time, both inside the error boundary.
    async fn dispatch(&mut self, envelope: &InboundEnvelope) -> Result<bool, FailureDetails> {
        let context = &self.context;
        let wall_clock = move || context.system_time();
        let view = StepView::new(&self.identity, &self.clock, &self.behavior, &self.state, &wall_clock);

        let did_step = guarded(DispatchStage::Process, self.processor.process(&view, envelope)).await?;
        let next_event_time = guarded(
            DispatchStage::EstimateNextEventTime,
            self.processor.estimate_next_event_time(&view),
        )
        .await?;

        self.next_event_time = next_event_time;
        Ok(did_step)
    }

    /// Idempotent teardown: latches shutdown, calls `logout` once and
    /// deactivates the agent.
    ///
    /// Returns `true` only for the call that performed the teardown.
    pub async fn shutdown(&mut self) -> bool {
        self.state.latch_shutdown();
        if !self.state.claim_teardown() {
            return false;
        }

        info!(agent_id = %self.identity.unique_id(), "shutting down");
        if let Err(failure) = guarded(DispatchStage::Logout, self.processor.logout()).await {
            warn!(agent_id = %self.identity.unique_id(), %failure, "logout failed");
        }
        self.state.deactivate();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ManualContext, RecordingBus, ScriptedProcessor};
    use chrono::Duration as TimeDelta;
    use std::sync::atomic::Ordering;

    type TestAgent = OrsimAgent<ManualContext, RecordingBus, ScriptedProcessor>;

    fn config(init_time_step: i64) -> AgentConfig {
        AgentConfig {
            unique_id: "A1".into(),
            run_id: "R1".into(),
            reference_time: "20240101000000".into(),
            init_time_step,
            scheduler: SchedulerSpec::new("S1", OrsimSettings::new(60.0, 10.0)),
            behavior: Behavior::from_rules([("sunny", 0.9), ("rainy", 0.3)]),
        }
    }

    fn agent_with(processor: ScriptedProcessor) -> (TestAgent, Arc<RecordingBus>, Arc<ManualContext>) {
        let ctx = ManualContext::shared();
        let bus = RecordingBus::shared();
        let agent = OrsimAgent::new(config(0), processor, Arc::clone(&ctx), Arc::clone(&bus)).unwrap();
        (agent, bus, ctx)
    }

    fn t0() -> NaiveDateTime {
        parse_reference_time("20240101000000").unwrap()
    }

    #[test]
    fn test_new_agent_state() {
        let (processor, _) = ScriptedProcessor::new();
        let (agent, _, _) = agent_with(processor);

        assert_eq!(agent.phase(), LifecyclePhase::Listening);
        assert!(agent.is_active());
        assert_eq!(agent.next_event_time(), t0());
        assert_eq!(agent.identity().agent_topic(), "R1/S1/ORSimAgent");
    }

    #[test]
    fn test_invalid_reference_time_rejected() {
        let (processor, _) = ScriptedProcessor::new();
        let mut cfg = config(0);
        cfg.reference_time = "yesterday".into();
        let result = TestAgent::new(cfg, processor, ManualContext::shared(), RecordingBus::shared());
        assert!(matches!(result, Err(CoreError::ReferenceTime { .. })));
    }

    #[tokio::test]
    async fn test_two_steps_publish_two_responses() {
        let (processor, log) = ScriptedProcessor::new();
        let (mut agent, bus, _) = agent_with(processor);

        agent.handle(InboundEnvelope::step(5)).await.unwrap();
        assert_eq!(agent.clock().elapsed_steps(), 5);
        assert_eq!(agent.clock().current_time(), t0() + TimeDelta::seconds(300));

        agent.handle(InboundEnvelope::step(7)).await.unwrap();
        assert_eq!(agent.clock().elapsed_steps(), 2);
        assert_eq!(agent.clock().current_time(), t0() + TimeDelta::seconds(420));

        let responses = bus.responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].time_step, 5);
        assert_eq!(responses[1].time_step, 7);
        assert!(responses.iter().all(|r| r.action == ResponseAction::Completed && r.did_step));
        assert!(bus.published().iter().all(|m| m.topic == "R1/S1/ORSimScheduler"));

        assert_eq!(log.lock().unwrap().elapsed, vec![5, 2]);
        assert_eq!(agent.next_event_time(), t0() + TimeDelta::seconds(480));
        assert_eq!(agent.phase(), LifecyclePhase::Listening);
    }

    #[tokio::test]
    async fn test_init_responds_ready() {
        let (processor, _) = ScriptedProcessor::new();
        let (mut agent, _, _) = agent_with(processor);

        let record = agent.handle(InboundEnvelope::init(0)).await.unwrap().unwrap();
        assert_eq!(record.action, ResponseAction::Ready);
        assert!(record.did_step);
    }

    #[tokio::test]
    async fn test_step_after_latch_reports_shutdown() {
        let (processor, _) = ScriptedProcessor::new();
        let (mut agent, _, _) = agent_with(processor);

        agent.state().latch_shutdown();
        let record = agent.handle(InboundEnvelope::step(3)).await.unwrap().unwrap();
        assert_eq!(record.action, ResponseAction::Shutdown);
        assert!(record.did_step);
    }

    #[tokio::test]
    async fn test_out_of_range_steps_still_get_one_response() {
        let (processor, _) = ScriptedProcessor::new();
        let (mut agent, bus, _) = agent_with(processor);

        let record = agent
            .handle(InboundEnvelope::step(-200_000_000_000_000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.time_step, -200_000_000_000_000);
        assert_eq!(agent.clock().current_time(), NaiveDateTime::MIN);

        agent.handle(InboundEnvelope::step(i64::MAX)).await.unwrap();
        assert_eq!(agent.clock().current_time(), NaiveDateTime::MAX);

        let responses = bus.responses();
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.action == ResponseAction::Completed));
        assert_eq!(agent.phase(), LifecyclePhase::Listening);
    }

    #[tokio::test]
    async fn test_shutdown_envelope_tears_down_once() {
        let (processor, log) = ScriptedProcessor::new();
        let (mut agent, bus, _) = agent_with(processor);

        let record = agent.handle(InboundEnvelope::shutdown(9)).await.unwrap().unwrap();
        assert_eq!(record.action, ResponseAction::Shutdown);
        assert!(record.did_step);
        assert_eq!(record.time_step, 9);
        assert_eq!(agent.phase(), LifecyclePhase::Shutdown);
        assert!(!agent.is_active());

        // Nothing further is answered.
        assert!(agent.handle(InboundEnvelope::step(10)).await.unwrap().is_none());
        assert!(agent.handle(InboundEnvelope::shutdown(11)).await.unwrap().is_none());
        assert_eq!(bus.responses().len(), 1);

        // Redundant teardown is a no-op.
        assert!(!agent.shutdown().await);
        assert_eq!(log.lock().unwrap().logouts, 1);
        assert!(log.lock().unwrap().processed.is_empty());
    }

    #[tokio::test]
    async fn test_domain_error_is_isolated() {
        let (mut processor, log) = ScriptedProcessor::new();
        processor.fail_on.insert(4);
        let (mut agent, bus, _) = agent_with(processor);

        let record = agent.handle(InboundEnvelope::step(4)).await.unwrap().unwrap();
        assert_eq!(record.action, ResponseAction::Error);
        assert!(!record.did_step);
        let failure = record.failure().unwrap();
        assert_eq!(failure.stage, DispatchStage::Process);
        assert_eq!(failure.kind, "scripted");
        assert_eq!(agent.phase(), LifecyclePhase::Listening);
        assert!(agent.is_active());

        let record = agent.handle(InboundEnvelope::step(5)).await.unwrap().unwrap();
        assert_eq!(record.action, ResponseAction::Completed);
        assert_eq!(bus.responses().len(), 2);
        assert_eq!(log.lock().unwrap().processed, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_domain_panic_is_isolated() {
        let (mut processor, _) = ScriptedProcessor::new();
        processor.panic_on.insert(2);
        let (mut agent, _, _) = agent_with(processor);

        let record = agent.handle(InboundEnvelope::step(2)).await.unwrap().unwrap();
        assert_eq!(record.action, ResponseAction::Error);
        assert_eq!(record.failure().unwrap().kind, "panic");

        let record = agent.handle(InboundEnvelope::step(3)).await.unwrap().unwrap();
        assert_eq!(record.action, ResponseAction::Completed);
    }

    #[tokio::test]
    async fn test_estimate_failure_is_an_error_response() {
        let (mut processor, _) = ScriptedProcessor::new();
        processor.fail_estimate = true;
        let (mut agent, _, _) = agent_with(processor);

        let record = agent.handle(InboundEnvelope::step(1)).await.unwrap().unwrap();
        assert_eq!(record.action, ResponseAction::Error);
        assert_eq!(record.failure().unwrap().stage, DispatchStage::EstimateNextEventTime);
        assert_eq!(agent.next_event_time(), t0());
    }

    #[tokio::test]
    async fn test_unknown_action_gets_error_response() {
        let (processor, log) = ScriptedProcessor::new();
        let (mut agent, bus, _) = agent_with(processor);

        let record = agent.handle(InboundEnvelope::new("pause", 6)).await.unwrap().unwrap();
        assert_eq!(record.action, ResponseAction::Error);
        assert_eq!(record.time_step, 6);
        let failure = record.failure().unwrap();
        assert_eq!(failure.stage, DispatchStage::Protocol);
        assert_eq!(failure.kind, "unknown_action");
        assert!(log.lock().unwrap().processed.is_empty());
        assert_eq!(bus.responses().len(), 1);
        assert_eq!(agent.phase(), LifecyclePhase::Listening);
    }

    #[tokio::test]
    async fn test_publish_failure_is_a_core_error() {
        let (processor, _) = ScriptedProcessor::new();
        let (mut agent, bus, _) = agent_with(processor);
        bus.fail_publish.store(true, Ordering::SeqCst);

        let result = agent.handle(InboundEnvelope::step(1)).await;
        assert!(matches!(result, Err(CoreError::Bus(_))));
        assert_eq!(agent.phase(), LifecyclePhase::Listening);
    }

    #[tokio::test]
    async fn test_unregistered_topic_and_garbage_are_ignored() {
        let (processor, _) = ScriptedProcessor::new();
        let (mut agent, bus, _) = agent_with(processor);

        let stray = BusMessage::new("R1/OTHER/ORSimAgent", InboundEnvelope::step(1).encode().unwrap());
        assert!(agent.on_receive(stray).await.unwrap().is_none());

        let garbage = BusMessage::new("R1/S1/ORSimAgent", b"not json".to_vec());
        assert!(agent.on_receive(garbage).await.unwrap().is_none());

        assert!(bus.responses().is_empty());
        assert_eq!(agent.phase(), LifecyclePhase::Listening);
    }

    #[tokio::test]
    async fn test_extra_control_topic_routes_to_handler() {
        let (processor, _) = ScriptedProcessor::new();
        let (mut agent, bus, _) = agent_with(processor);
        let topic = "R1/S1/ORSimAgent/replay";

        let message = BusMessage::new(topic, InboundEnvelope::step(3).encode().unwrap());
        assert!(agent.on_receive(message.clone()).await.unwrap().is_none());

        agent.register_control_topic(topic);
        let record = agent.on_receive(message).await.unwrap().unwrap();
        assert_eq!(record.action, ResponseAction::Completed);
        assert_eq!(record.time_step, 3);
        assert_eq!(bus.responses().len(), 1);
    }

    #[tokio::test]
    async fn test_payload_cache_and_step_log() {
        let (processor, _) = ScriptedProcessor::new();
        let (mut agent, _, _) = agent_with(processor);

        let envelope = InboundEnvelope::step(2).with_field("weather", "rainy");
        agent.handle(envelope.clone()).await.unwrap();

        assert_eq!(agent.payload_cache(), Some(&envelope));
        let log: Vec<String> = agent.state().step_log().into_iter().map(|e| e.message).collect();
        assert_eq!(log, vec!["handling step".to_string(), "processing step 2".to_string()]);
    }

    #[test]
    fn test_transition_probability_lookup() {
        let (processor, _) = ScriptedProcessor::new();
        let (agent, _, _) = agent_with(processor);
        assert_eq!(agent.get_transition_probability("rainy", 0.1), 0.3);
        assert_eq!(agent.get_transition_probability("snowy", 0.1), 0.1);
    }

    #[tokio::test]
    async fn test_start_listening_runs_init_first() {
        let (processor, log) = ScriptedProcessor::new();
        let ctx = ManualContext::shared();
        let bus = RecordingBus::shared();
        let mut agent = TestAgent::new(config(3), processor, ctx, Arc::clone(&bus)).unwrap();

        agent.start_listening().await.unwrap();

        assert_eq!(bus.subscribed(), vec!["R1/S1/ORSimAgent".to_string()]);
        let responses = bus.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].action, ResponseAction::Ready);
        assert_eq!(responses[0].time_step, 3);
        assert_eq!(log.lock().unwrap().processed, vec![3]);
    }

    #[tokio::test]
    async fn test_unreachable_bus_reports_init_error() {
        let (processor, log) = ScriptedProcessor::new();
        let (mut agent, bus, _) = agent_with(processor);
        bus.fail_subscribe.store(true, Ordering::SeqCst);

        let result = agent.start_listening().await;
        assert!(matches!(result, Err(CoreError::Bus(_))));

        let responses = bus.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].action, ResponseAction::InitError);
        assert_eq!(responses[0].time_step, -1);
        assert_eq!(responses[0].failure().unwrap().stage, DispatchStage::Startup);
        assert!(log.lock().unwrap().processed.is_empty());
    }

    #[tokio::test]
    async fn test_listen_until_shutdown_envelope() {
        let (processor, log) = ScriptedProcessor::new();
        let (mut agent, bus, _) = agent_with(processor);
        let topic = agent.identity().agent_topic();

        bus.deliver(&topic, &InboundEnvelope::step(1));
        bus.deliver(&topic, &InboundEnvelope::step(2));
        bus.deliver(&topic, &InboundEnvelope::shutdown(3));
        bus.deliver(&topic, &InboundEnvelope::step(4));

        tokio::time::timeout(Duration::from_secs(5), agent.run())
            .await
            .expect("agent should stop after shutdown")
            .unwrap();

        let actions: Vec<ResponseAction> = bus.responses().iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![
                ResponseAction::Ready,
                ResponseAction::Completed,
                ResponseAction::Completed,
                ResponseAction::Shutdown,
            ]
        );
        assert!(bus.is_disconnected());
        assert_eq!(log.lock().unwrap().logouts, 1);
        assert_eq!(agent.phase(), LifecyclePhase::Shutdown);
    }

    #[tokio::test]
    async fn test_heartbeat_breach_mid_step() {
        let (mut processor, log) = ScriptedProcessor::new();
        processor.stall_on = Some((2, Duration::from_millis(200)));
        let (mut agent, bus, _) = agent_with(processor);
        let topic = agent.identity().agent_topic();

        bus.deliver(&topic, &InboundEnvelope::step(1));
        bus.deliver(&topic, &InboundEnvelope::step(2));

        // The stalled step lets the heartbeat advance virtual time past the
        // timeout; the latch then turns the response into `shutdown` and
        // the loop tears down without waiting for another message.
        tokio::time::timeout(Duration::from_secs(5), agent.run())
            .await
            .expect("agent should stop after heartbeat breach")
            .unwrap();

        let responses = bus.responses();
        let actions: Vec<ResponseAction> = responses.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![ResponseAction::Ready, ResponseAction::Completed, ResponseAction::Shutdown]
        );
        assert!(responses[2].run_time_seconds > 10.0);
        assert!(!agent.is_active());
        assert_eq!(log.lock().unwrap().logouts, 1);
        assert!(bus.is_disconnected());
    }
}
