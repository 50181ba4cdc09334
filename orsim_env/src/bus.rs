//! Publish/subscribe transport abstraction.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{BusMessage, SessionId};

/// Abstraction for the message bus an agent talks to the scheduler through.
///
/// # Implementations
///
/// - **Production**: wraps an MQTT/AMQP client session
/// - **Simulation**: `orsim_sim::BusClient`, channel based fan-out
///
/// # Message Flow
///
/// ```text
/// Scheduler                    Bus                        Agent
///   |                           |                          |
///   |-- publish(agent_topic) -->|                          |
///   |                           |-- [fan-out] ------------>|
///   |                           |                          |-- recv() -> msg
///   |                           |<-- publish(sched_topic) -|
///   |<-- [fan-out] -------------|                          |
/// ```
///
/// Delivery guarantees (ordering, at-least-once, reconnection) belong to
/// the implementation, not to callers.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publishes a payload on a topic.
    ///
    /// # Returns
    /// * `Ok(())` - Payload handed to the transport (no acknowledgment)
    /// * `Err(EnvError)` - Immediate failure (session closed, unreachable)
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), EnvError>;

    /// Subscribes this session to the given topics.
    async fn subscribe(&self, topics: &[String]) -> Result<(), EnvError>;

    /// Receives the next message delivered to this session.
    ///
    /// Returns `None` once the session has been disconnected.
    async fn recv(&self) -> Option<BusMessage>;

    /// Closes the session. Further `recv` calls return `None`.
    async fn disconnect(&self);

    /// Returns this session's id.
    fn session_id(&self) -> SessionId;
}
