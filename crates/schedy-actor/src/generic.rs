//! Generic and switch actors
//!
//! A generic actor knows a fixed set of states, each mapped to one service
//! call. Values are handled in their string form, so `1`, `1.0` and `"1"`
//! are distinct while `true` and `"true"` are the same state.

use std::sync::Arc;

use indexmap::IndexMap;
use schedy_core::{EntityId, EntityState, ServiceCall};
use schedy_expression::{ValidationError, ValueRules};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::actor_type::{flat_attribute, ActorAdapter, ActorType};
use crate::error::{ActorError, ActorResult};
use crate::settings::merge_config;

/// State name matching every state without an entry of its own
pub const WILDCARD_STATE: &str = "_other_";

/// String form used for comparing and dispatching values
fn state_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn validate_scalar(value: Value) -> Result<Value, ValidationError> {
    if state_name(&value).is_none() {
        return Err(ValidationError::new(
            &value,
            "generic actors accept strings, numbers and booleans only",
        ));
    }
    Ok(value)
}

fn names_equal(a: &Value, b: &Value) -> bool {
    match (state_name(a), state_name(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StateDefinition {
    service: String,
    #[serde(default)]
    service_data: Option<Map<String, Value>>,
    #[serde(default = "default_true")]
    include_entity_id: bool,
    #[serde(default)]
    value_param: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_state_attr() -> Option<String> {
    Some("state".to_string())
}

#[derive(Debug, Clone, Deserialize)]
struct GenericConfig {
    #[serde(default = "default_state_attr")]
    state_attr: Option<String>,
    #[serde(default)]
    states: Option<IndexMap<String, Option<StateDefinition>>>,
}

/// Parsed service of one state
#[derive(Debug, Clone)]
struct StateCall {
    domain: String,
    service: String,
    data: Map<String, Value>,
    include_entity_id: bool,
    value_param: Option<String>,
}

/// Adapter of a generic actor entity
#[derive(Debug)]
pub struct GenericAdapter {
    entity_id: EntityId,
    state_attr: Option<String>,
    states: IndexMap<String, StateCall>,
}

impl GenericAdapter {
    fn from_config(entity_id: &EntityId, config: &Value) -> ActorResult<Self> {
        let config: GenericConfig = serde_json::from_value(config.clone())
            .map_err(|e| ActorError::invalid_config(entity_id, e.to_string()))?;

        let mut states = IndexMap::new();
        for (name, definition) in config.states.unwrap_or_default() {
            let Some(definition) = definition else {
                return Err(ActorError::invalid_config(
                    entity_id,
                    format!("state {name:?} has no service"),
                ));
            };
            let (domain, service) = split_service(&definition.service).ok_or_else(|| {
                ActorError::invalid_config(
                    entity_id,
                    format!("invalid service {:?} for state {name:?}", definition.service),
                )
            })?;
            let name = if name.eq_ignore_ascii_case(WILDCARD_STATE) {
                WILDCARD_STATE.to_string()
            } else {
                name
            };
            states.insert(
                name,
                StateCall {
                    domain,
                    service,
                    data: definition.service_data.unwrap_or_default(),
                    include_entity_id: definition.include_entity_id,
                    value_param: definition.value_param,
                },
            );
        }

        Ok(Self {
            entity_id: entity_id.clone(),
            state_attr: config.state_attr,
            states,
        })
    }

    fn state_call(&self, state: &str) -> Option<&StateCall> {
        self.states
            .get(state)
            .or_else(|| self.states.get(WILDCARD_STATE))
    }
}

/// Split `domain.service` (or `domain/service`) at the first separator
fn split_service(service: &str) -> Option<(String, String)> {
    let (domain, name) = service.split_once(['.', '/'])?;
    if domain.is_empty() || name.is_empty() {
        return None;
    }
    Some((domain.to_string(), name.to_string()))
}

impl ActorAdapter for GenericAdapter {
    fn filter_set_value(&self, value: Value) -> Option<Value> {
        let name = state_name(&value)?;
        if self.state_call(&name).is_some() {
            return Some(Value::String(name));
        }
        warn!(
            entity_id = %self.entity_id,
            state = %name,
            "State is not known by this actor, ignoring request to set it"
        );
        None
    }

    fn service_calls(&self, value: &Value) -> Vec<ServiceCall> {
        let Some(name) = state_name(value) else {
            return Vec::new();
        };
        let Some(call) = self.state_call(&name) else {
            return Vec::new();
        };

        let mut data = call.data.clone();
        if call.include_entity_id {
            data.entry("entity_id")
                .or_insert_with(|| json!(self.entity_id.to_string()));
        }
        if let Some(param) = &call.value_param {
            data.entry(param.clone()).or_insert_with(|| value.clone());
        }
        vec![ServiceCall::new(&call.domain, &call.service, Value::Object(data))]
    }

    fn observed_value(&self, state: &EntityState) -> Option<Value> {
        let attr = self.state_attr.as_deref()?;
        let observed = flat_attribute(state, attr)?;
        debug!(entity_id = %self.entity_id, attribute = attr, value = %observed, "Attribute read");
        state_name(&observed).map(Value::String)
    }
}

/// Actor type of configurable generic entities
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericActorType;

impl ValueRules for GenericActorType {
    fn validate_value(&self, value: Value) -> Result<Value, ValidationError> {
        validate_scalar(value)
    }

    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        names_equal(a, b)
    }
}

impl ActorType for GenericActorType {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn create_adapter(
        &self,
        entity_id: &EntityId,
        config: &Value,
    ) -> ActorResult<Arc<dyn ActorAdapter>> {
        Ok(Arc::new(GenericAdapter::from_config(entity_id, config)?))
    }
}

/// Binary on/off switches
///
/// A generic actor with the states `on` and `off` preconfigured to
/// `homeassistant.turn_on` and `homeassistant.turn_off`. Booleans are
/// accepted and normalized to `"on"`/`"off"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchActorType;

impl SwitchActorType {
    fn config_defaults() -> Value {
        json!({
            "states": {
                "on": {"service": "homeassistant.turn_on"},
                "off": {"service": "homeassistant.turn_off"},
            }
        })
    }
}

impl ValueRules for SwitchActorType {
    fn validate_value(&self, value: Value) -> Result<Value, ValidationError> {
        match &value {
            Value::Bool(true) => Ok(json!("on")),
            Value::Bool(false) => Ok(json!("off")),
            Value::String(s) if s.eq_ignore_ascii_case("on") => Ok(json!("on")),
            Value::String(s) if s.eq_ignore_ascii_case("off") => Ok(json!("off")),
            _ => Err(ValidationError::new(&value, "switch values are \"on\" and \"off\"")),
        }
    }

    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        names_equal(a, b)
    }
}

impl ActorType for SwitchActorType {
    fn name(&self) -> &'static str {
        "switch"
    }

    fn create_adapter(
        &self,
        entity_id: &EntityId,
        config: &Value,
    ) -> ActorResult<Arc<dyn ActorAdapter>> {
        let mut merged = Self::config_defaults();
        merge_config(&mut merged, config);
        Ok(Arc::new(GenericAdapter::from_config(entity_id, &merged)?))
    }
}
