//! In-memory publish/subscribe broker with fault injection.

use async_trait::async_trait;
use orsim_env::{AgentCredentials, BusMessage, EnvError, MessageBus, SessionId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-session inbox capacity.
const INBOX_CAPACITY: usize = 1024;

/// Delivery counters, for scenario reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub published: u64,
    pub delivered: u64,
    /// Deliveries lost to a full inbox
    pub dropped: u64,
}

#[derive(Default)]
struct BrokerState {
    inboxes: HashMap<SessionId, mpsc::Sender<BusMessage>>,
    subscriptions: HashMap<String, HashSet<SessionId>>,
    stats: BrokerStats,
}

/// Topic fan-out shared by every session of one simulated run.
///
/// Cloning yields another handle on the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    controller: BrokerController,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session for the given credentials.
    pub fn connect(&self, credentials: &AgentCredentials) -> BusClient {
        let session = SessionId::new();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.lock().inboxes.insert(session, tx);
        debug!(session = %session, username = %credentials.username, "session connected");

        BusClient {
            session,
            username: credentials.username.clone(),
            broker: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Fault-injection handle for this broker.
    pub fn controller(&self) -> BrokerController {
        self.controller.clone()
    }

    pub fn stats(&self) -> BrokerStats {
        self.lock().stats
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.lock().inboxes.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(&self, session: SessionId, topics: &[String]) -> Result<(), EnvError> {
        let mut state = self.lock();
        if !state.inboxes.contains_key(&session) {
            return Err(EnvError::Disconnected);
        }
        for topic in topics {
            state.subscriptions.entry(topic.clone()).or_default().insert(session);
        }
        Ok(())
    }

    /// Hands the payload to every session subscribed to `topic`.
    fn route(&self, topic: &str, payload: Vec<u8>) -> usize {
        let mut state = self.lock();
        state.stats.published += 1;

        let targets: Vec<SessionId> = state
            .subscriptions
            .get(topic)
            .map(|sessions| sessions.iter().copied().collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for session in targets {
            let Some(inbox) = state.inboxes.get(&session) else {
                continue;
            };
            match inbox.try_send(BusMessage::new(topic, payload.clone())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session = %session, topic, "inbox full, message dropped");
                    state.stats.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        state.stats.delivered += delivered as u64;
        delivered
    }

    fn disconnect(&self, session: SessionId) {
        let mut state = self.lock();
        state.inboxes.remove(&session);
        for sessions in state.subscriptions.values_mut() {
            sessions.remove(&session);
        }
    }

    fn is_connected(&self, session: SessionId) -> bool {
        self.lock().inboxes.contains_key(&session)
    }
}

/// One session on an [`InMemoryBroker`].
pub struct BusClient {
    session: SessionId,
    username: String,
    broker: InMemoryBroker,
    rx: tokio::sync::Mutex<mpsc::Receiver<BusMessage>>,
}

impl BusClient {
    pub fn username(&self) -> &str {
        &self.username
    }

    fn ensure_reachable(&self) -> Result<(), EnvError> {
        if self.broker.controller.is_isolated(&self.username) {
            return Err(EnvError::unreachable(format!("broker (as {})", self.username)));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for BusClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), EnvError> {
        self.ensure_reachable()?;
        if !self.broker.is_connected(self.session) {
            return Err(EnvError::Disconnected);
        }
        let delivered = self.broker.route(topic, payload);
        debug!(session = %self.session, topic, delivered, "published");
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), EnvError> {
        self.ensure_reachable()?;
        self.broker.subscribe(self.session, topics)
    }

    async fn recv(&self) -> Option<BusMessage> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    async fn disconnect(&self) {
        self.broker.disconnect(self.session);
        debug!(session = %self.session, username = %self.username, "session disconnected");
    }

    fn session_id(&self) -> SessionId {
        self.session
    }
}

/// Broker-side fault injection.
///
/// An isolated user name can neither subscribe nor publish; its calls fail
/// with `EnvError::Unreachable`.
#[derive(Clone, Default)]
pub struct BrokerController {
    isolated: Arc<Mutex<HashSet<String>>>,
}

impl BrokerController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cuts `username` off from the broker.
    pub fn isolate(&self, username: impl Into<String>) {
        self.isolated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(username.into());
    }

    /// Reconnects every isolated user.
    pub fn heal_all(&self) {
        self.isolated.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn is_isolated(&self, username: &str) -> bool {
        self.isolated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(username)
    }
}
