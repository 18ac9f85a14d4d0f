//! Initial entity states for the in-process host
//!
//! ```yaml
//! binary_sensor.window: "off"
//! climate.living:
//!   state: heat
//!   attributes:
//!     temperature: 18
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use schedy_core::EntityId;
use schedy_host::MemoryStateStore;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeedState {
    State(String),
    Full {
        state: String,
        #[serde(default)]
        attributes: HashMap<String, Value>,
    },
}

/// Parsed seed file, in file order
#[derive(Debug, Default)]
pub struct SeedStates(Vec<(EntityId, String, HashMap<String, Value>)>);

impl SeedStates {
    pub fn load(path: &Path) -> Result<Self> {
        let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());
        let file = path.file_name().map(Path::new).unwrap_or(path);
        let document = schedy_config::load_yaml(dir.unwrap_or(Path::new(".")), file)
            .with_context(|| format!("loading states from {}", path.display()))?;
        Self::from_yaml(document)
    }

    pub fn from_yaml(document: serde_yaml::Value) -> Result<Self> {
        if document.is_null() {
            return Ok(Self::default());
        }
        let raw: IndexMap<String, SeedState> =
            serde_yaml::from_value(document).context("states must map entity ids to states")?;
        raw.into_iter()
            .map(|(entity_id, seed)| {
                let id: EntityId = entity_id
                    .parse()
                    .with_context(|| format!("invalid entity id {entity_id:?}"))?;
                Ok(match seed {
                    SeedState::State(state) => (id, state, HashMap::new()),
                    SeedState::Full { state, attributes } => (id, state, attributes),
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Write every state into `store`
    pub fn apply(&self, store: &MemoryStateStore) {
        for (entity_id, state, attributes) in &self.0 {
            debug!(entity_id = %entity_id, state = %state, "Seeding state");
            store.set_state(entity_id, state, attributes.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schedy_core::StateStore;
    use schedy_host::EventBus;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_seed_states() {
        let document = serde_yaml::from_str(
            "binary_sensor.window: 'off'\nclimate.living:\n  state: heat\n  attributes:\n    temperature: 18\n",
        )
        .unwrap();
        let seeds = SeedStates::from_yaml(document).unwrap();
        assert_eq!(seeds.len(), 2);

        let store = MemoryStateStore::new(Arc::new(EventBus::new()));
        seeds.apply(&store);
        let living = store.get(&"climate.living".parse().unwrap()).unwrap();
        assert_eq!(living.state, "heat");
        assert_eq!(living.attributes.get("temperature"), Some(&json!(18)));
        let window = store.get(&"binary_sensor.window".parse().unwrap()).unwrap();
        assert_eq!(window.state, "off");
    }

    #[test]
    fn test_invalid_entity_id() {
        let document = serde_yaml::from_str("Window: 'off'\n").unwrap();
        assert!(SeedStates::from_yaml(document).is_err());
    }
}
