//! Topic -> handler routing for inbound bus messages.

use std::collections::HashMap;
use tracing::debug;

/// Plain mapping from topic to a single handler.
///
/// `H` is whatever the owner dispatches on: the agent runtime uses a small
/// enum of its own handlers, tests use closures.
#[derive(Debug, Clone)]
pub struct MessageRouter<H> {
    handlers: HashMap<String, H>,
}

impl<H> MessageRouter<H> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `topic`. The last registration wins; the
    /// replaced handler is returned.
    pub fn register(&mut self, topic: impl Into<String>, handler: H) -> Option<H> {
        self.handlers.insert(topic.into(), handler)
    }

    /// Looks up the handler for `topic`.
    ///
    /// An unregistered topic is logged and yields `None`; it is never an
    /// error.
    pub fn dispatch(&self, topic: &str) -> Option<&H> {
        let handler = self.handlers.get(topic);
        if handler.is_none() {
            debug!(topic, "no handler registered for topic, ignoring message");
        }
        handler
    }

    /// Topics with a registered handler, for subscription.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<H> Default for MessageRouter<H> {
    fn default() -> Self {
        Self::new()
    }
}
