//! Simulation context implementing AgentContext with a virtual clock.

use async_trait::async_trait;
use orsim_env::AgentContext;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Real-time pause taken by every `sleep`, so idle polling loops park
/// instead of spinning.
const REAL_PARK: Duration = Duration::from_millis(1);

/// Simulation context backed by a virtual clock.
///
/// - `now()` reads the virtual clock, which only moves when advanced
/// - `sleep()` advances the virtual clock by the requested duration, then
///   parks briefly in real time
///
/// Step timeouts of many seconds are therefore reached in a few real
/// milliseconds, which keeps heartbeat scenarios fast and independent of
/// machine load.
pub struct SimContext {
    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext at virtual time zero.
    pub fn new() -> Self {
        Self {
            virtual_time_ns: Arc::new(Mutex::new(0)),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *time += duration.as_nanos() as u64;
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time_ns: u64) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *time = time_ns;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl AgentContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance_time(duration);
        tokio::time::sleep(REAL_PARK).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(task = name, "spawning simulated task");
        tokio::spawn(future);
    }
}
