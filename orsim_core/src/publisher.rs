//! Serializes response records onto the scheduler topic.

use crate::error::CoreError;
use crate::response::ResponseRecord;
use orsim_env::MessageBus;
use std::sync::Arc;
use tracing::trace;

/// Emits response records on the single scheduler-bound topic.
///
/// No acknowledgment is awaited; delivery is the bus's job.
pub struct ResponsePublisher<Bus: MessageBus> {
    bus: Arc<Bus>,
    topic: String,
}

impl<Bus: MessageBus> ResponsePublisher<Bus> {
    pub fn new(bus: Arc<Bus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serializes and publishes one record.
    pub async fn publish(&self, record: &ResponseRecord) -> Result<(), CoreError> {
        let payload = record.encode()?;
        trace!(topic = %self.topic, action = ?record.action, time_step = record.time_step, "publishing response");
        self.bus.publish(&self.topic, payload).await?;
        Ok(())
    }
}
