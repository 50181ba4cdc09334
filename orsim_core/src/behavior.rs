//! Agent behavior data and transition-probability lookup.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key holding the ordered `[condition, probability]` rules.
pub const TRANSITION_RULES_KEY: &str = "transition_prob";

/// Opaque, agent-specific behavior document.
///
/// Only the `transition_prob` rule list is interpreted by the runtime;
/// everything else is left for the domain processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Behavior(Value);

impl Behavior {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Behavior with no data at all.
    pub fn empty() -> Self {
        Self(Value::Null)
    }

    /// Builds a behavior document holding only transition rules.
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        let rules: Vec<Value> = rules
            .into_iter()
            .map(|(condition, prob)| Value::from(vec![Value::from(condition), Value::from(prob)]))
            .collect();
        let mut doc = serde_json::Map::new();
        doc.insert(TRANSITION_RULES_KEY.to_string(), Value::Array(rules));
        Self(Value::Object(doc))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Returns the field `key` of the document, if any.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Probability attached to the first rule whose condition equals
    /// `condition`, or `default`.
    ///
    /// Missing or malformed rule data degrades to `default`; this lookup
    /// never fails a step.
    pub fn transition_probability(&self, condition: &str, default: f64) -> f64 {
        let Some(rules) = self.0.get(TRANSITION_RULES_KEY).and_then(Value::as_array) else {
            return default;
        };

        for rule in rules {
            let Some(pair) = rule.as_array() else {
                return default;
            };
            let (Some(rule_condition), Some(prob)) = (pair.first(), pair.get(1)) else {
                return default;
            };
            if rule_condition.as_str() == Some(condition) {
                return prob.as_f64().unwrap_or(default);
            }
        }

        default
    }
}

impl From<Value> for Behavior {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
