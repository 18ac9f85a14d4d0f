//! In-memory entity state store

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use schedy_core::events::StateChangedData;
use schedy_core::{Context, EntityId, EntityState, StateStore};
use serde_json::Value;
use tracing::trace;

use crate::event_bus::EventBus;

/// Entity states kept in memory
///
/// Every write fires a `state_changed` event carrying the old and the new
/// state, like the host platform does.
pub struct MemoryStateStore {
    states: DashMap<EntityId, EntityState>,
    bus: Arc<EventBus>,
}

impl MemoryStateStore {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Write a state; returns the new state
    pub fn set_state(
        &self,
        entity_id: &EntityId,
        state: &str,
        attributes: HashMap<String, Value>,
    ) -> EntityState {
        let old_state = self.states.get(entity_id).map(|s| s.clone());
        let new_state = match &old_state {
            Some(old) => old.with_update(state, attributes),
            None => EntityState::new(entity_id.clone(), state, attributes),
        };
        self.states.insert(entity_id.clone(), new_state.clone());
        trace!(entity_id = %entity_id, state = %state, "State written");

        self.bus.fire_typed(
            StateChangedData {
                entity_id: entity_id.clone(),
                old_state,
                new_state: Some(new_state.clone()),
            },
            Context::new(),
        );
        new_state
    }

    /// Change some attributes, keeping state and the other attributes
    pub fn update_attributes(
        &self,
        entity_id: &EntityId,
        changes: impl IntoIterator<Item = (String, Value)>,
    ) -> Option<EntityState> {
        let current = self.states.get(entity_id).map(|s| s.clone())?;
        let mut attributes = current.attributes.clone();
        attributes.extend(changes);
        Some(self.set_state(entity_id, &current.state, attributes))
    }

    pub fn get_attributes(&self, entity_id: &EntityId) -> Option<HashMap<String, Value>> {
        self.states.get(entity_id).map(|s| s.attributes.clone())
    }

    pub fn remove(&self, entity_id: &EntityId) -> Option<EntityState> {
        let (_, old_state) = self.states.remove(entity_id)?;
        self.bus.fire_typed(
            StateChangedData {
                entity_id: entity_id.clone(),
                old_state: Some(old_state.clone()),
                new_state: None,
            },
            Context::new(),
        );
        Some(old_state)
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.states.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, entity_id: &EntityId) -> Option<EntityState> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    fn all(&self) -> Vec<EntityState> {
        self.states.iter().map(|entry| entry.value().clone()).collect()
    }

    fn set(&self, entity_id: &EntityId, state: &str, attributes: HashMap<String, Value>) {
        self.set_state(entity_id, state, attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schedy_core::events::STATE_CHANGED;
    use serde_json::json;

    fn make_test_store() -> MemoryStateStore {
        MemoryStateStore::new(Arc::new(EventBus::new()))
    }

    #[test]
    fn test_set_and_get() {
        let store = make_test_store();
        let id: EntityId = "climate.bath".parse().unwrap();
        assert!(store.get(&id).is_none());

        store.set(&id, "heat", [("temperature".to_string(), json!(21.0))].into());
        let state = store.get(&id).unwrap();
        assert_eq!(state.state, "heat");
        assert_eq!(state.attribute::<f64>("temperature"), Some(21.0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.all()[0].entity_id, id);
    }

    #[tokio::test]
    async fn test_set_fires_state_changed() {
        let store = make_test_store();
        let mut rx = store.bus().subscribe(STATE_CHANGED);
        let id: EntityId = "switch.pump".parse().unwrap();

        store.set_state(&id, "off", HashMap::new());
        store.set_state(&id, "on", HashMap::new());

        let first: StateChangedData = rx.recv().await.unwrap().parse().unwrap();
        assert!(first.old_state.is_none());
        let second: StateChangedData = rx.recv().await.unwrap().parse().unwrap();
        assert_eq!(second.old_state.unwrap().state, "off");
        assert_eq!(second.new_state.unwrap().state, "on");
    }

    #[test]
    fn test_update_attributes_keeps_others() {
        let store = make_test_store();
        let id: EntityId = "climate.bath".parse().unwrap();
        assert!(store.update_attributes(&id, [("a".to_string(), json!(1))]).is_none());

        store.set(&id, "heat", [("temperature".to_string(), json!(20.0))].into());
        let state = store
            .update_attributes(&id, [("current_temperature".to_string(), json!(18.5))])
            .unwrap();
        assert_eq!(state.state, "heat");
        assert_eq!(state.attributes.len(), 2);
    }

    #[test]
    fn test_remove() {
        let store = make_test_store();
        let id: EntityId = "switch.pump".parse().unwrap();
        store.set(&id, "on", HashMap::new());
        assert_eq!(store.remove(&id).unwrap().state, "on");
        assert!(store.is_empty());
        assert!(store.remove(&id).is_none());
    }
}
