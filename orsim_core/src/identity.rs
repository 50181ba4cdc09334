//! Agent identity and the topic namespace derived from it.

use orsim_env::AgentCredentials;
use serde::{Deserialize, Serialize};

/// Suffix of the topic agents listen on.
pub const AGENT_TOPIC_SUFFIX: &str = "ORSimAgent";

/// Suffix of the topic the scheduler listens on.
pub const SCHEDULER_TOPIC_SUFFIX: &str = "ORSimScheduler";

const AGENT_PASSWORD: &str = "secret_password";

/// Immutable identity of one agent within one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    unique_id: String,
    run_id: String,
    scheduler_id: String,
}

impl AgentIdentity {
    pub fn new(
        unique_id: impl Into<String>,
        run_id: impl Into<String>,
        scheduler_id: impl Into<String>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            run_id: run_id.into(),
            scheduler_id: scheduler_id.into(),
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn scheduler_id(&self) -> &str {
        &self.scheduler_id
    }

    /// Inbound control topic: `{run_id}/{scheduler_id}/ORSimAgent`.
    pub fn agent_topic(&self) -> String {
        agent_topic(&self.run_id, &self.scheduler_id)
    }

    /// Outbound response topic: `{run_id}/{scheduler_id}/ORSimScheduler`.
    pub fn scheduler_topic(&self) -> String {
        scheduler_topic(&self.run_id, &self.scheduler_id)
    }

    /// Bus credentials: `{run_id}_{scheduler_id}_{unique_id}`.
    pub fn credentials(&self) -> AgentCredentials {
        AgentCredentials::new(
            format!("{}_{}_{}", self.run_id, self.scheduler_id, self.unique_id),
            AGENT_PASSWORD,
        )
    }
}

impl std::fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}/{}", self.unique_id, self.run_id, self.scheduler_id)
    }
}

/// Control topic for a run/scheduler pair.
pub fn agent_topic(run_id: &str, scheduler_id: &str) -> String {
    format!("{run_id}/{scheduler_id}/{AGENT_TOPIC_SUFFIX}")
}

/// Response topic for a run/scheduler pair.
pub fn scheduler_topic(run_id: &str, scheduler_id: &str) -> String {
    format!("{run_id}/{scheduler_id}/{SCHEDULER_TOPIC_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_follow_naming_scheme() {
        let id = AgentIdentity::new("A1", "R1", "S1");
        assert_eq!(id.agent_topic(), "R1/S1/ORSimAgent");
        assert_eq!(id.scheduler_topic(), "R1/S1/ORSimScheduler");
    }

    #[test]
    fn test_credentials_are_namespaced() {
        let id = AgentIdentity::new("A1", "R1", "S1");
        let creds = id.credentials();
        assert_eq!(creds.username, "R1_S1_A1");
        assert!(!creds.password.is_empty());
    }
}
