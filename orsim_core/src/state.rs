//! Processing state shared between the message schedule and the heartbeat.
//!
//! Every flag is an atomic and every cross-schedule write is monotonic:
//! `active` only goes true -> false, `shutting_down` and `torn_down` only
//! false -> true. A stale read can delay detection by one heartbeat tick
//! but never produces a state the agent has to recover from.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Observable lifecycle phase, derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Listening,
    Processing,
    ShuttingDown,
    Shutdown,
}

/// One diagnostic line recorded while handling an envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepLogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

pub struct ProcessingState {
    active: AtomicBool,
    shutting_down: AtomicBool,
    torn_down: AtomicBool,
    in_flight: AtomicBool,
    /// Context time (nanos) at which the current envelope was received
    started_at_ns: AtomicU64,
    /// Diagnostic only; never read for control decisions
    step_log: Mutex<Vec<StepLogEntry>>,
    /// Wakes the listening loop once the shutdown latch is set
    shutdown_signal: Notify,
}

impl ProcessingState {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            started_at_ns: AtomicU64::new(0),
            step_log: Mutex::new(Vec::new()),
            shutdown_signal: Notify::new(),
        }
    }

    /// Marks an envelope as received: clears the step log and stamps
    /// the start time before raising the in-flight flag.
    pub fn begin_processing(&self, now: Duration) {
        self.log().clear();
        self.started_at_ns.store(now.as_nanos() as u64, Ordering::SeqCst);
        self.in_flight.store(true, Ordering::SeqCst);
    }

    pub fn end_processing(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn started_at(&self) -> Duration {
        Duration::from_nanos(self.started_at_ns.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Sets the shutdown latch and wakes the listening loop.
    ///
    /// Returns `true` only for the call that actually set it.
    pub fn latch_shutdown(&self) -> bool {
        let first = !self.shutting_down.swap(true, Ordering::SeqCst);
        if first {
            self.shutdown_signal.notify_one();
        }
        first
    }

    /// Claims the single teardown. Returns `true` exactly once.
    pub fn claim_teardown(&self) -> bool {
        self.torn_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Resolves once the shutdown latch has been set.
    pub async fn shutdown_requested(&self) {
        if self.is_shutting_down() {
            return;
        }
        self.shutdown_signal.notified().await;
    }

    pub fn phase(&self) -> LifecyclePhase {
        if self.is_torn_down() {
            LifecyclePhase::Shutdown
        } else if self.is_shutting_down() {
            LifecyclePhase::ShuttingDown
        } else if self.is_in_flight() {
            LifecyclePhase::Processing
        } else {
            LifecyclePhase::Listening
        }
    }

    pub fn add_step_log(&self, at: DateTime<Utc>, message: impl Into<String>) {
        self.log().push(StepLogEntry {
            at,
            message: message.into(),
        });
    }

    pub fn step_log(&self) -> Vec<StepLogEntry> {
        self.log().clone()
    }

    /// Step log as pretty JSON, for the heartbeat diagnostic.
    pub fn step_log_json(&self) -> String {
        serde_json::to_string_pretty(&*self.log()).unwrap_or_default()
    }

    fn log(&self) -> MutexGuard<'_, Vec<StepLogEntry>> {
        self.step_log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self::new()
    }
}
