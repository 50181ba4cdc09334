//! Fault scenarios the harness can drive.

use serde::Serialize;
use std::fmt;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Every agent healthy; all steps complete in lockstep
    Lockstep,

    /// One agent errors on one step and panics on the next
    Faulty,

    /// One agent stalls past the step timeout mid-step
    Stall,

    /// One agent cannot reach the broker at startup
    Isolated,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Lockstep,
            ScenarioId::Faulty,
            ScenarioId::Stall,
            ScenarioId::Isolated,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Lockstep => "lockstep",
            ScenarioId::Faulty => "faulty",
            ScenarioId::Stall => "stall",
            ScenarioId::Isolated => "isolated",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Lockstep => "All agents walk every step; every response is 'completed'",
            ScenarioId::Faulty => {
                "Agent 0 returns an error at step 2 and panics at step 3, then recovers"
            }
            ScenarioId::Stall => {
                "Agent 0 blocks past STEP_TIMEOUT at step 2; heartbeat flags it and it reports 'shutdown'"
            }
            ScenarioId::Isolated => "Agent 0 is cut off from the broker; the rest run unaffected",
        }
    }

    /// Parses a scenario name. `None` for unknown names.
    pub fn from_name(name: &str) -> Option<ScenarioId> {
        Self::all().into_iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(ScenarioId::from_name(scenario.name()), Some(scenario));
            assert!(!scenario.description().is_empty());
        }
        assert_eq!(ScenarioId::from_name("time_warp"), None);
    }

    proptest! {
        #[test]
        fn test_only_known_names_parse(name in "[a-z_]{0,12}") {
            let parsed = ScenarioId::from_name(&name);
            let known = ScenarioId::all().iter().any(|s| s.name() == name);
            prop_assert_eq!(parsed.is_some(), known);
        }
    }
}
