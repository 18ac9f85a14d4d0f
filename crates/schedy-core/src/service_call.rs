//! Requests sent to the host to change an entity

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Context, EntityId};

/// One invocation of `domain.service`, such as `climate.set_temperature`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub service_data: Value,
    #[serde(default)]
    pub context: Context,
}

impl ServiceCall {
    pub fn new(domain: impl Into<String>, service: impl Into<String>, service_data: Value) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data,
            context: Context::new(),
        }
    }

    /// `domain.service`
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Typed view of one service data field
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        T::deserialize(self.service_data.get(key)?).ok()
    }

    /// The entity named by the `entity_id` field, if it is a single valid id
    pub fn target_entity(&self) -> Option<EntityId> {
        self.service_data.get("entity_id")?.as_str()?.parse().ok()
    }
}
