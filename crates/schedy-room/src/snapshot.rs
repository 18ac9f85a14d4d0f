//! Persisted representation of a room
//!
//! Published as the state of `schedy_room.<app>_<room>`: the serialized
//! scheduled value is the entity state, the snapshot fields are its
//! attributes. Values are stored in the persisted string form of the
//! room's actor type.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use schedy_core::{slugify, EntityId, EntityIdError, STATE_UNKNOWN};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Domain of the entities rooms are persisted as
pub const PERSIST_DOMAIN: &str = "schedy_room";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlaySnapshot {
    pub wanted_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescheduling_time: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub revert_on_no_result: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wanted_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<OverlaySnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescheduling_time: Option<NaiveDateTime>,
    /// Wanted values of the actors by entity id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actors: BTreeMap<String, String>,
}

impl RoomSnapshot {
    /// Entity id a room of an app is persisted as
    pub fn entity_id(app_name: &str, room_name: &str) -> Result<EntityId, EntityIdError> {
        EntityId::new(PERSIST_DOMAIN, slugify(&format!("{app_name}_{room_name}")))
    }

    /// State string of the persisted entity
    pub fn state(&self) -> &str {
        self.scheduled_value.as_deref().unwrap_or(STATE_UNKNOWN)
    }

    pub fn to_attributes(&self) -> HashMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => HashMap::new(),
        }
    }

    /// Read a snapshot back, ignoring attributes it doesn't know
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> serde_json::Result<Self> {
        let map: Map<String, Value> = attributes
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        serde_json::from_value(Value::Object(map))
    }
}
