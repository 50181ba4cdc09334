//! In-crate fakes for the environment traits and a scripted processor.

use crate::envelope::InboundEnvelope;
use crate::error::StepError;
use crate::processor::{StepProcessor, StepView};
use crate::response::ResponseRecord;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use orsim_env::{AgentContext, BusMessage, EnvError, MessageBus, SessionId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Virtual clock; `sleep` advances it and parks for a real millisecond.
#[derive(Default)]
pub struct ManualContext {
    now: Mutex<Duration>,
}

impl ManualContext {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

#[async_trait]
impl AgentContext for ManualContext {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_704_067_200) + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }
}

/// Bus that records publishes and serves injected inbound messages.
pub struct RecordingBus {
    session: SessionId,
    published: Mutex<Vec<BusMessage>>,
    subscribed: Mutex<Vec<String>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<BusMessage>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BusMessage>>,
    pub fail_subscribe: AtomicBool,
    pub fail_publish: AtomicBool,
}

impl RecordingBus {
    pub fn shared() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            session: SessionId::new(),
            published: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            fail_subscribe: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
        })
    }

    /// Queues an envelope as if the scheduler had published it.
    pub fn deliver(&self, topic: &str, envelope: &InboundEnvelope) {
        if let Some(tx) = self.inbound_tx.lock().unwrap().as_ref() {
            let _ = tx.send(BusMessage::new(topic, envelope.encode().unwrap()));
        }
    }

    pub fn deliver_raw(&self, topic: &str, payload: &[u8]) {
        if let Some(tx) = self.inbound_tx.lock().unwrap().as_ref() {
            let _ = tx.send(BusMessage::new(topic, payload.to_vec()));
        }
    }

    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn responses(&self) -> Vec<ResponseRecord> {
        self.published()
            .iter()
            .map(|m| ResponseRecord::decode(&m.payload).unwrap())
            .collect()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.inbound_tx.lock().unwrap().is_none()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), EnvError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(EnvError::network("publish rejected"));
        }
        self.published.lock().unwrap().push(BusMessage::new(topic, payload));
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), EnvError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(EnvError::unreachable("test broker"));
        }
        self.subscribed.lock().unwrap().extend(topics.iter().cloned());
        Ok(())
    }

    async fn recv(&self) -> Option<BusMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn disconnect(&self) {
        self.inbound_tx.lock().unwrap().take();
    }

    fn session_id(&self) -> SessionId {
        self.session
    }
}

/// What a [`ScriptedProcessor`] observed.
#[derive(Debug, Default)]
pub struct ProcessorLog {
    pub processed: Vec<i64>,
    pub elapsed: Vec<i64>,
    pub logouts: usize,
}

/// Processor whose failures and stalls are chosen per step.
#[derive(Default)]
pub struct ScriptedProcessor {
    pub log: Arc<Mutex<ProcessorLog>>,
    pub fail_on: HashSet<i64>,
    pub panic_on: HashSet<i64>,
    pub fail_estimate: bool,
    /// Real-time pause inside `process` for the given step
    pub stall_on: Option<(i64, Duration)>,
}

impl ScriptedProcessor {
    pub fn new() -> (Self, Arc<Mutex<ProcessorLog>>) {
        let processor = Self::default();
        let log = Arc::clone(&processor.log);
        (processor, log)
    }
}

#[async_trait]
impl StepProcessor for ScriptedProcessor {
    async fn process(
        &mut self,
        view: &StepView<'_>,
        _envelope: &InboundEnvelope,
    ) -> Result<bool, StepError> {
        let step = view.clock().current_step();
        {
            let mut log = self.log.lock().unwrap();
            log.processed.push(step);
            log.elapsed.push(view.clock().elapsed_steps());
        }
        view.add_step_log(format!("processing step {step}"));

        if let Some((stall_step, pause)) = self.stall_on {
            if stall_step == step {
                tokio::time::sleep(pause).await;
            }
        }
        if self.panic_on.contains(&step) {
            panic!("scripted panic at step {step}");
        }
        if self.fail_on.contains(&step) {
            return Err(StepError::new("scripted", format!("refused step {step}")));
        }
        Ok(true)
    }

    async fn estimate_next_event_time(
        &mut self,
        view: &StepView<'_>,
    ) -> Result<NaiveDateTime, StepError> {
        if self.fail_estimate {
            return Err(StepError::new("no_estimate", "cannot estimate"));
        }
        Ok(view.clock().time_at(view.clock().current_step().saturating_add(1)))
    }

    async fn logout(&mut self) -> Result<(), StepError> {
        self.log.lock().unwrap().logouts += 1;
        Ok(())
    }
}
