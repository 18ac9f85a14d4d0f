//! Entities whose changes make rooms re-evaluate their schedules

use std::collections::HashMap;

use schedy_config::{WatchMode, WatchedEntity, ALL_ATTRIBUTES, STATE_ATTRIBUTE};
use schedy_core::{EntityId, EntityState};
use tracing::trace;

/// Watches of all rooms, indexed by entity
#[derive(Debug, Default)]
pub struct WatchTable {
    watches: HashMap<EntityId, Vec<(usize, WatchedEntity)>>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the watches of the room at `room_index`
    pub fn add_room(&mut self, room_index: usize, watched: &[WatchedEntity]) {
        for watch in watched.iter().filter(|w| w.mode != WatchMode::Ignore) {
            self.watches
                .entry(watch.entity_id.clone())
                .or_default()
                .push((room_index, watch.clone()));
        }
    }

    pub fn is_watched(&self, entity_id: &EntityId) -> bool {
        self.watches.contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.watches.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Rooms to re-evaluate after a state change, with whether to reset them
    ///
    /// A room watching the entity more than once is returned once; it is
    /// reset if any of its matching watches asks for it.
    pub fn affected_rooms(
        &self,
        entity_id: &EntityId,
        old_state: Option<&EntityState>,
        new_state: Option<&EntityState>,
    ) -> Vec<(usize, bool)> {
        let Some(watches) = self.watches.get(entity_id) else {
            return Vec::new();
        };

        let mut affected: Vec<(usize, bool)> = Vec::new();
        for (room_index, watch) in watches {
            let Some(attribute) = watch
                .attributes
                .iter()
                .find(|attribute| attribute_changed(attribute, old_state, new_state))
            else {
                continue;
            };
            trace!(entity_id = %entity_id, attribute = %attribute, room = room_index, "Watched entity changed");

            let reset = watch.mode == WatchMode::Reset;
            match affected.iter_mut().find(|(index, _)| index == room_index) {
                Some((_, existing)) => *existing |= reset,
                None => affected.push((*room_index, reset)),
            }
        }
        affected
    }
}

fn attribute_changed(attribute: &str, old: Option<&EntityState>, new: Option<&EntityState>) -> bool {
    match (old, new) {
        (None, None) => false,
        (Some(old), Some(new)) => match attribute {
            STATE_ATTRIBUTE => old.state != new.state,
            ALL_ATTRIBUTES => old.state != new.state || old.attributes != new.attributes,
            name => old.attributes.get(name) != new.attributes.get(name),
        },
        (Some(state), None) | (None, Some(state)) => match attribute {
            STATE_ATTRIBUTE | ALL_ATTRIBUTES => true,
            name => state.attributes.contains_key(name),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(entity_id: &str) -> EntityId {
        entity_id.parse().unwrap()
    }

    fn watch(entity_id: &str, attributes: &[&str], mode: WatchMode) -> WatchedEntity {
        WatchedEntity {
            entity_id: id(entity_id),
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
            mode,
        }
    }

    fn state(entity_id: &str, state: &str, temperature: f64) -> EntityState {
        EntityState::new(
            id(entity_id),
            state,
            HashMap::from([("temperature".to_string(), json!(temperature))]),
        )
    }

    fn make_test_table() -> WatchTable {
        let mut table = WatchTable::new();
        table.add_room(0, &[watch("sensor.a", &["state"], WatchMode::Reevaluate)]);
        table.add_room(
            1,
            &[
                watch("sensor.a", &["temperature"], WatchMode::Reset),
                watch("sensor.a", &["all"], WatchMode::Reevaluate),
                watch("sensor.b", &["state"], WatchMode::Ignore),
            ],
        );
        table
    }

    #[test]
    fn test_state_change() {
        let table = make_test_table();
        let old = state("sensor.a", "on", 20.0);
        let new = state("sensor.a", "off", 20.0);
        let affected = table.affected_rooms(&id("sensor.a"), Some(&old), Some(&new));
        assert_eq!(affected, vec![(0, false), (1, false)]);
    }

    #[test]
    fn test_attribute_change_resets() {
        let table = make_test_table();
        let old = state("sensor.a", "on", 20.0);
        let new = state("sensor.a", "on", 21.0);
        let affected = table.affected_rooms(&id("sensor.a"), Some(&old), Some(&new));
        assert_eq!(affected, vec![(1, true)]);
    }

    #[test]
    fn test_unchanged_and_ignored() {
        let table = make_test_table();
        let old = state("sensor.a", "on", 20.0);
        assert!(table
            .affected_rooms(&id("sensor.a"), Some(&old), Some(&old.clone()))
            .is_empty());
        assert!(!table.is_watched(&id("sensor.b")));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_appearing_entity() {
        let table = make_test_table();
        let new = state("sensor.a", "on", 20.0);
        let affected = table.affected_rooms(&id("sensor.a"), None, Some(&new));
        assert_eq!(affected, vec![(0, false), (1, true)]);
    }
}
