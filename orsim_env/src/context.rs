//! Core environment context trait for ORSim agents.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for time and task interaction.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
/// - **Simulation**: `orsim_sim::SimContext` - virtual clock advanced by the harness
///
/// Both the message-processing schedule and the heartbeat schedule read
/// time exclusively through this trait, so step timeouts can be exercised
/// deterministically.
#[async_trait]
pub trait AgentContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// Used for processing start/end stamps and heartbeat comparisons.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time (used for step log keys).
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
