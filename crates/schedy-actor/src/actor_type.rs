//! Actor type and adapter contracts

use std::fmt;
use std::sync::Arc;

use schedy_core::{EntityId, EntityState, ServiceCall};
use schedy_expression::{CombineError, Preliminary, ValidationError, ValueRules};
use serde_json::Value;

use crate::error::{ActorError, ActorResult};
use crate::generic::{GenericActorType, SwitchActorType};
use crate::thermostat::ThermostatActorType;

/// A kind of actor, shared by every actor of a room
///
/// The [`ValueRules`] half decides which values are valid and how modifiers
/// combine with them; the rest covers persistence and adapter construction.
pub trait ActorType: ValueRules + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Persisted string form of a valid value
    fn serialize_value(&self, value: &Value) -> ActorResult<String> {
        serde_json::to_string(value).map_err(|e| ActorError::Serialize {
            value: value.clone(),
            reason: e.to_string(),
        })
    }

    /// Inverse of [`serialize_value`](ActorType::serialize_value)
    fn deserialize_value(&self, input: &str) -> ActorResult<Value> {
        let value: Value = serde_json::from_str(input).map_err(|e| ActorError::Deserialize {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        self.validate_value(value)
            .map_err(|e| ActorError::Deserialize {
                input: input.to_string(),
                reason: e.reason,
            })
    }

    /// Constants made available to expressions of rooms using this type
    fn expression_globals(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }

    /// Statistical parameters apps of this type can publish
    fn statistics(&self) -> &'static [&'static str] {
        &[]
    }

    /// Contribution of one actor to the statistical parameter `statistic`
    ///
    /// `value` is the actor's current value and `state` its entity state.
    /// `None` means the actor is off or its data is incomplete.
    fn statistic_sample(
        &self,
        _statistic: &str,
        _value: Option<&Value>,
        _state: Option<&EntityState>,
    ) -> Option<f64> {
        None
    }

    /// Build the adapter of one entity from its merged configuration
    fn create_adapter(
        &self,
        entity_id: &EntityId,
        config: &Value,
    ) -> ActorResult<Arc<dyn ActorAdapter>>;
}

/// Per-entity translation between values and the host
pub trait ActorAdapter: Send + Sync + fmt::Debug {
    /// Adjust a value for this entity; `None` means nothing is sent
    fn filter_set_value(&self, value: Value) -> Option<Value> {
        Some(value)
    }

    /// Service calls pushing `value` to the entity
    fn service_calls(&self, value: &Value) -> Vec<ServiceCall>;

    /// The value an entity state represents, if it represents one
    fn observed_value(&self, state: &EntityState) -> Option<Value>;

    /// Warn about configuration that doesn't fit the entity's initial state
    fn check_plausibility(&self, _state: &EntityState) {}
}

/// [`ValueRules`] of an actor type behind a trait object
///
/// Lets the evaluator use a `dyn ActorType` where it expects `dyn ValueRules`.
#[derive(Debug, Clone)]
pub struct ActorTypeRules(Arc<dyn ActorType>);

impl ActorTypeRules {
    pub fn new(actor_type: Arc<dyn ActorType>) -> Self {
        Self(actor_type)
    }
}

impl ValueRules for ActorTypeRules {
    fn validate_value(&self, value: Value) -> Result<Value, ValidationError> {
        self.0.validate_value(value)
    }

    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        self.0.values_equal(a, b)
    }

    fn combine(&self, modifier: &Preliminary, value: &Value) -> Result<Value, CombineError> {
        self.0.combine(modifier, value)
    }
}

/// Names accepted by [`actor_type_by_name`]
pub fn actor_type_names() -> &'static [&'static str] {
    &["generic", "switch", "thermostat"]
}

pub fn actor_type_by_name(name: &str) -> ActorResult<Arc<dyn ActorType>> {
    match name {
        "generic" => Ok(Arc::new(GenericActorType)),
        "switch" => Ok(Arc::new(SwitchActorType)),
        "thermostat" => Ok(Arc::new(ThermostatActorType)),
        other => Err(ActorError::UnknownType(other.to_string())),
    }
}

/// Read an attribute of a state, treating `state` as the state string itself
pub fn flat_attribute(state: &EntityState, name: &str) -> Option<Value> {
    if let Some(value) = state.attributes.get(name) {
        return Some(value.clone());
    }
    (name == "state").then(|| Value::String(state.state.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_actor_type_by_name() {
        for name in actor_type_names() {
            assert_eq!(actor_type_by_name(name).unwrap().name(), *name);
        }
        assert!(matches!(
            actor_type_by_name("dimmer"),
            Err(ActorError::UnknownType(_))
        ));
    }

    #[test]
    fn test_flat_attribute() {
        let entity_id: EntityId = "climate.living".parse().unwrap();
        let state = EntityState::new(
            entity_id,
            "heat",
            [("temperature".to_string(), json!(21.0))].into_iter().collect(),
        );
        assert_eq!(flat_attribute(&state, "state"), Some(json!("heat")));
        assert_eq!(flat_attribute(&state, "temperature"), Some(json!(21.0)));
        assert_eq!(flat_attribute(&state, "humidity"), None);
    }

    #[test]
    fn test_default_serialization_round_trips_through_validation() {
        let actor_type = actor_type_by_name("generic").unwrap();
        let text = actor_type.serialize_value(&json!("on")).unwrap();
        assert_eq!(text, "\"on\"");
        assert_eq!(actor_type.deserialize_value(&text).unwrap(), json!("on"));
        assert!(actor_type.deserialize_value("{not json").is_err());
        assert!(actor_type.deserialize_value("null").is_err());
    }
}
