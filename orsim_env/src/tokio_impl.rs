//! Production implementation of AgentContext using Tokio.

use crate::AgentContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by Tokio and the OS clock.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, "spawning background task");
        tokio::spawn(future);
    }
}
