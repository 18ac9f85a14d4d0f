//! Entity states as reported by the host

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{Context, EntityId, STATE_UNAVAILABLE, STATE_UNKNOWN};

/// A state string plus structured attributes
///
/// Equality ignores timestamps and context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: EntityId,
    pub state: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    /// Last time `state` took a different value
    pub last_changed: DateTime<Utc>,
    /// Last write of any kind
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub context: Context,
}

impl EntityState {
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            context: Context::new(),
        }
    }

    /// The state after a write; `last_changed` only moves if `state` did
    pub fn with_update(&self, state: impl Into<String>, attributes: HashMap<String, Value>) -> Self {
        let mut next = Self::new(self.entity_id.clone(), state, attributes);
        if next.state == self.state {
            next.last_changed = self.last_changed;
        }
        next
    }

    /// Neither unknown nor unavailable
    pub fn is_known(&self) -> bool {
        self.state != STATE_UNKNOWN && self.state != STATE_UNAVAILABLE
    }

    pub fn attribute<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        T::deserialize(self.attributes.get(key)?).ok()
    }
}

impl PartialEq for EntityState {
    fn eq(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_test_state(state: &str) -> EntityState {
        EntityState::new("climate.bath".parse().unwrap(), state, HashMap::new())
    }

    #[test]
    fn test_with_update_keeps_last_changed() {
        let state = make_test_state("heat");
        let attributes = HashMap::from([("temperature".to_string(), json!(21.0))]);

        let updated = state.with_update("heat", attributes.clone());
        assert_eq!(updated.last_changed, state.last_changed);
        assert_eq!(updated.attribute::<f64>("temperature"), Some(21.0));
        assert_eq!(updated.attribute::<String>("temperature"), None);

        let changed = updated.with_update("off", attributes);
        assert!(changed.last_changed >= updated.last_changed);
        assert_ne!(changed, updated);
    }

    #[test]
    fn test_known_states() {
        assert!(make_test_state("on").is_known());
        assert!(!make_test_state(STATE_UNKNOWN).is_known());
        assert!(!make_test_state(STATE_UNAVAILABLE).is_known());
    }
}
