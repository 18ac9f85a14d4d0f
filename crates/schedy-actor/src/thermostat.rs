//! Thermostat actor
//!
//! Values are temperatures in degrees or the special value `OFF`. `OFF`
//! absorbs arithmetic: adding to or multiplying it keeps it `OFF`.

use std::fmt;
use std::sync::Arc;

use schedy_core::{EntityId, EntityState, ServiceCall};
use schedy_expression::{CombineError, Preliminary, ValidationError, ValueRules};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::actor_type::{flat_attribute, ActorAdapter, ActorType};
use crate::error::{ActorError, ActorResult};

const OFF: &str = "OFF";

/// Target minus current temperature of every thermostat
pub const TEMP_DELTA: &str = "temp_delta";

const CURRENT_TEMPERATURE: &str = "current_temperature";

/// A target temperature
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Temp {
    Off,
    Degrees(f64),
}

impl Temp {
    /// Parse a number or a string like `" 21.5 "` or `"off"`
    pub fn parse(value: &Value) -> Option<Temp> {
        match value {
            Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(Temp::Degrees),
            Value::String(s) => {
                let compact: String = s.split_whitespace().collect();
                if compact.eq_ignore_ascii_case(OFF) {
                    return Some(Temp::Off);
                }
                compact
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(Temp::Degrees)
            }
            _ => None,
        }
    }

    pub fn is_off(&self) -> bool {
        matches!(self, Temp::Off)
    }

    pub fn to_value(self) -> Value {
        match self {
            Temp::Off => json!(OFF),
            Temp::Degrees(degrees) => json!(degrees),
        }
    }
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Temp::Off => f.write_str(OFF),
            Temp::Degrees(degrees) => write!(f, "{degrees}"),
        }
    }
}

/// Actor type of climate entities
#[derive(Debug, Clone, Copy, Default)]
pub struct ThermostatActorType;

impl ThermostatActorType {
    fn temp(value: &Value) -> Result<Temp, ValidationError> {
        Temp::parse(value)
            .ok_or_else(|| ValidationError::new(value, "not a valid temperature"))
    }
}

impl ValueRules for ThermostatActorType {
    fn validate_value(&self, value: Value) -> Result<Value, ValidationError> {
        Ok(Self::temp(&value)?.to_value())
    }

    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match (Temp::parse(a), Temp::parse(b)) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        }
    }

    fn combine(&self, modifier: &Preliminary, value: &Value) -> Result<Value, CombineError> {
        let fail = |reason: &str| CombineError::new(modifier.to_string(), value, reason);
        let temp = Temp::parse(value).ok_or_else(|| fail("not a temperature"))?;

        let arithmetic = |operand: &Value, op: fn(f64, f64) -> f64| -> Result<Value, CombineError> {
            let operand = Temp::parse(operand).ok_or_else(|| fail("operand is not a temperature"))?;
            Ok(match (temp, operand) {
                (Temp::Degrees(a), Temp::Degrees(b)) => Temp::Degrees(op(a, b)).to_value(),
                _ => Temp::Off.to_value(),
            })
        };

        match modifier {
            Preliminary::Add(operand) => arithmetic(operand, |a, b| a + b),
            Preliminary::Multiply(operand) => arithmetic(operand, |a, b| a * b),
            Preliminary::Negate => Ok(match temp {
                Temp::Off => Temp::Off.to_value(),
                Temp::Degrees(d) => Temp::Degrees(-d).to_value(),
            }),
            other => other.combine_with(value),
        }
    }
}

impl ActorType for ThermostatActorType {
    fn name(&self) -> &'static str {
        "thermostat"
    }

    fn serialize_value(&self, value: &Value) -> ActorResult<String> {
        Temp::parse(value)
            .map(|t| t.to_string())
            .ok_or_else(|| ActorError::Serialize {
                value: value.clone(),
                reason: "not a temperature".to_string(),
            })
    }

    fn deserialize_value(&self, input: &str) -> ActorResult<Value> {
        Temp::parse(&Value::String(input.to_string()))
            .map(Temp::to_value)
            .ok_or_else(|| ActorError::Deserialize {
                input: input.to_string(),
                reason: "not a temperature".to_string(),
            })
    }

    fn expression_globals(&self) -> Vec<(&'static str, Value)> {
        vec![("OFF", json!(OFF))]
    }

    fn statistics(&self) -> &'static [&'static str] {
        &[TEMP_DELTA]
    }

    fn statistic_sample(
        &self,
        statistic: &str,
        value: Option<&Value>,
        state: Option<&EntityState>,
    ) -> Option<f64> {
        if statistic != TEMP_DELTA {
            return None;
        }
        let Temp::Degrees(target) = Temp::parse(value?)? else {
            return None;
        };
        let current = state?.attributes.get(CURRENT_TEMPERATURE)?;
        match Temp::parse(current)? {
            Temp::Degrees(current) => Some(target - current),
            Temp::Off => None,
        }
    }

    fn create_adapter(
        &self,
        entity_id: &EntityId,
        config: &Value,
    ) -> ActorResult<Arc<dyn ActorAdapter>> {
        Ok(Arc::new(ThermostatAdapter::from_config(entity_id, config)?))
    }
}

#[derive(Debug, Deserialize)]
struct ThermostatConfig {
    #[serde(default)]
    delta: Option<Value>,
    #[serde(default)]
    min_temp: Option<Value>,
    #[serde(default)]
    max_temp: Option<Value>,
    #[serde(default)]
    off_temp: Option<Value>,
    #[serde(default = "default_true")]
    supports_hvac_modes: bool,
    #[serde(default = "default_hvac_mode_on")]
    hvac_mode_on: String,
    #[serde(default = "default_hvac_mode_off")]
    hvac_mode_off: String,
}

fn default_true() -> bool {
    true
}

fn default_hvac_mode_on() -> String {
    "heat".to_string()
}

fn default_hvac_mode_off() -> String {
    "off".to_string()
}

/// Adapter of one climate entity
#[derive(Debug)]
pub struct ThermostatAdapter {
    entity_id: EntityId,
    delta: f64,
    min_temp: Option<f64>,
    max_temp: Option<f64>,
    off_temp: Temp,
    supports_hvac_modes: bool,
    hvac_mode_on: String,
    hvac_mode_off: String,
}

impl ThermostatAdapter {
    fn from_config(entity_id: &EntityId, config: &Value) -> ActorResult<Self> {
        let config: ThermostatConfig = serde_json::from_value(config.clone())
            .map_err(|e| ActorError::invalid_config(entity_id, e.to_string()))?;

        let degrees = |key: &str, value: Option<&Value>| -> ActorResult<Option<f64>> {
            match value {
                None | Some(Value::Null) => Ok(None),
                Some(value) => match Temp::parse(value) {
                    Some(Temp::Degrees(d)) => Ok(Some(d)),
                    _ => Err(ActorError::invalid_config(
                        entity_id,
                        format!("{key} must be a temperature other than OFF, got {value}"),
                    )),
                },
            }
        };

        let off_temp = match &config.off_temp {
            None | Some(Value::Null) => Temp::Off,
            Some(value) => Temp::parse(value).ok_or_else(|| {
                ActorError::invalid_config(entity_id, format!("off_temp is no temperature: {value}"))
            })?,
        };

        Ok(Self {
            entity_id: entity_id.clone(),
            delta: degrees("delta", config.delta.as_ref())?.unwrap_or(0.0),
            min_temp: degrees("min_temp", config.min_temp.as_ref())?,
            max_temp: degrees("max_temp", config.max_temp.as_ref())?,
            off_temp,
            supports_hvac_modes: config.supports_hvac_modes,
            hvac_mode_on: config.hvac_mode_on,
            hvac_mode_off: config.hvac_mode_off,
        })
    }

    fn call(&self, service: &str, data: Value) -> ServiceCall {
        ServiceCall::new("climate", service, data)
    }
}

impl ActorAdapter for ThermostatAdapter {
    fn filter_set_value(&self, value: Value) -> Option<Value> {
        let mut temp = Temp::parse(&value)?;
        if temp.is_off() {
            temp = self.off_temp;
        }

        match temp {
            Temp::Degrees(degrees) => {
                let mut degrees = degrees + self.delta;
                if let Some(min) = self.min_temp.filter(|min| degrees < *min) {
                    degrees = min;
                } else if let Some(max) = self.max_temp.filter(|max| degrees > *max) {
                    degrees = max;
                }
                Some(Temp::Degrees(degrees).to_value())
            }
            Temp::Off if !self.supports_hvac_modes => {
                warn!(
                    entity_id = %self.entity_id,
                    "Not turning off because HVAC modes aren't supported, consider setting off_temp"
                );
                None
            }
            Temp::Off => Some(Temp::Off.to_value()),
        }
    }

    fn service_calls(&self, value: &Value) -> Vec<ServiceCall> {
        let Some(temp) = Temp::parse(value) else {
            return Vec::new();
        };
        let entity_id = self.entity_id.to_string();

        let mut calls = Vec::with_capacity(2);
        if self.supports_hvac_modes {
            let hvac_mode = match temp {
                Temp::Off => &self.hvac_mode_off,
                Temp::Degrees(_) => &self.hvac_mode_on,
            };
            calls.push(self.call(
                "set_hvac_mode",
                json!({"entity_id": entity_id, "hvac_mode": hvac_mode}),
            ));
        }
        if let Temp::Degrees(degrees) = temp {
            calls.push(self.call(
                "set_temperature",
                json!({"entity_id": entity_id, "temperature": degrees}),
            ));
        }
        calls
    }

    fn observed_value(&self, state: &EntityState) -> Option<Value> {
        if self.supports_hvac_modes {
            debug!(entity_id = %self.entity_id, hvac_mode = %state.state, "HVAC mode read");
            if state.state == self.hvac_mode_off {
                return Some(Temp::Off.to_value());
            }
            if state.state != self.hvac_mode_on {
                error!(
                    entity_id = %self.entity_id,
                    hvac_mode = %state.state,
                    "Unknown HVAC mode, ignoring thermostat"
                );
                return None;
            }
        }

        let target = state.attributes.get("temperature");
        match target.and_then(Temp::parse) {
            Some(temp) => Some(temp.to_value()),
            None => {
                error!(
                    entity_id = %self.entity_id,
                    temperature = ?target,
                    "Invalid target temperature, ignoring thermostat"
                );
                None
            }
        }
    }

    fn check_plausibility(&self, state: &EntityState) {
        let mut required = vec!["temperature"];
        if self.supports_hvac_modes {
            required.push("state");
        }
        for attr in required {
            if flat_attribute(state, attr).is_none() {
                warn!(
                    entity_id = %self.entity_id,
                    attribute = attr,
                    available = ?state.attributes.keys().collect::<Vec<_>>(),
                    "Thermostat has no such attribute, please check your config"
                );
            }
        }

        let hvac_modes: Option<Vec<String>> = state.attribute("hvac_modes");
        match (self.supports_hvac_modes, hvac_modes) {
            (false, Some(modes)) if !modes.is_empty() => warn!(
                entity_id = %self.entity_id,
                ?modes,
                "HVAC mode support is disabled, but the thermostat seems to support modes"
            ),
            (true, None) => warn!(
                entity_id = %self.entity_id,
                "Thermostat reports no hvac_modes, consider disabling HVAC mode support"
            ),
            (true, Some(modes)) => {
                for mode in [&self.hvac_mode_on, &self.hvac_mode_off] {
                    if !modes.contains(mode) {
                        warn!(
                            entity_id = %self.entity_id,
                            hvac_mode = %mode,
                            supported = ?modes,
                            "Thermostat doesn't seem to support this HVAC mode"
                        );
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_test_adapter(config: Value) -> ThermostatAdapter {
        ThermostatAdapter::from_config(&"climate.living".parse().unwrap(), &config).unwrap()
    }

    fn make_test_state(hvac_mode: &str, temperature: Value) -> EntityState {
        let attributes: HashMap<String, Value> =
            [("temperature".to_string(), temperature)].into_iter().collect();
        EntityState::new("climate.living".parse().unwrap(), hvac_mode, attributes)
    }

    #[test]
    fn test_temp_parse() {
        assert_eq!(Temp::parse(&json!(21)), Some(Temp::Degrees(21.0)));
        assert_eq!(Temp::parse(&json!(" 2 1.5 ")), Some(Temp::Degrees(21.5)));
        assert_eq!(Temp::parse(&json!("off")), Some(Temp::Off));
        assert_eq!(Temp::parse(&json!("warm")), None);
        assert_eq!(Temp::parse(&json!(true)), None);
        assert_eq!(Temp::parse(&Value::Null), None);
    }

    #[test]
    fn test_temp_delta_sample() {
        let rules = ThermostatActorType;
        let mut state = make_test_state("heat", json!(21));
        state
            .attributes
            .insert(CURRENT_TEMPERATURE.to_string(), json!("19.5"));
        let sample = |value: Value, state: Option<&EntityState>| {
            rules.statistic_sample(TEMP_DELTA, Some(&value), state)
        };

        assert_eq!(sample(json!(21.0), Some(&state)), Some(1.5));
        assert_eq!(sample(json!("OFF"), Some(&state)), None);
        assert_eq!(sample(json!(21.0), None), None);
        assert_eq!(rules.statistic_sample("humidity", Some(&json!(21.0)), Some(&state)), None);
        assert_eq!(rules.statistic_sample(TEMP_DELTA, None, Some(&state)), None);

        state.attributes.remove(CURRENT_TEMPERATURE);
        assert_eq!(sample(json!(21.0), Some(&state)), None);
    }

    #[test]
    fn test_validate_and_equality() {
        let rules = ThermostatActorType;
        assert_eq!(rules.validate_value(json!(20)).unwrap(), json!(20.0));
        assert_eq!(rules.validate_value(json!("Off")).unwrap(), json!("OFF"));
        assert!(rules.validate_value(json!("hot")).is_err());
        assert!(rules.values_equal(&json!(20), &json!(20.0)));
        assert!(!rules.values_equal(&json!(20), &json!("OFF")));
    }

    #[test]
    fn test_off_absorbs_arithmetic() {
        let rules = ThermostatActorType;
        let off = json!("OFF");
        assert_eq!(rules.combine(&Preliminary::Add(json!(2)), &off).unwrap(), off);
        assert_eq!(rules.combine(&Preliminary::Multiply(json!(2)), &off).unwrap(), off);
        assert_eq!(rules.combine(&Preliminary::Negate, &off).unwrap(), off);
        assert_eq!(
            rules.combine(&Preliminary::Add(json!(1.5)), &json!(20.0)).unwrap(),
            json!(21.5)
        );
        assert_eq!(rules.combine(&Preliminary::Add(off.clone()), &json!(20.0)).unwrap(), off);
        assert!(rules.combine(&Preliminary::Add(json!("warm")), &json!(20.0)).is_err());
    }

    #[test]
    fn test_serialization() {
        let actor_type = ThermostatActorType;
        assert_eq!(actor_type.serialize_value(&json!(21.5)).unwrap(), "21.5");
        assert_eq!(actor_type.serialize_value(&json!("OFF")).unwrap(), "OFF");
        assert_eq!(actor_type.deserialize_value("21.5").unwrap(), json!(21.5));
        assert_eq!(actor_type.deserialize_value("OFF").unwrap(), json!("OFF"));
        assert!(actor_type.deserialize_value("hot").is_err());
        assert!(actor_type.serialize_value(&json!([1])).is_err());
    }

    #[test]
    fn test_filter_applies_delta_and_clamps() {
        let adapter = make_test_adapter(json!({"delta": 1, "min_temp": 10, "max_temp": 24}));
        assert_eq!(adapter.filter_set_value(json!(20.0)), Some(json!(21.0)));
        assert_eq!(adapter.filter_set_value(json!(5.0)), Some(json!(10.0)));
        assert_eq!(adapter.filter_set_value(json!(30.0)), Some(json!(24.0)));
        assert_eq!(adapter.filter_set_value(json!("OFF")), Some(json!("OFF")));
    }

    #[test]
    fn test_filter_off_temp() {
        let adapter = make_test_adapter(json!({"off_temp": 5, "supports_hvac_modes": false}));
        assert_eq!(adapter.filter_set_value(json!("OFF")), Some(json!(5.0)));

        let adapter = make_test_adapter(json!({"supports_hvac_modes": false}));
        assert_eq!(adapter.filter_set_value(json!("OFF")), None);
    }

    #[test]
    fn test_invalid_config() {
        let result =
            ThermostatAdapter::from_config(&"climate.x".parse().unwrap(), &json!({"delta": "OFF"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_service_calls() {
        let adapter = make_test_adapter(json!({}));
        let calls = adapter.service_calls(&json!(21.0));
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].service_id(), "climate.set_hvac_mode");
        assert_eq!(calls[0].get::<String>("hvac_mode").as_deref(), Some("heat"));
        assert_eq!(calls[1].service_id(), "climate.set_temperature");
        assert_eq!(calls[1].get::<f64>("temperature"), Some(21.0));

        let calls = adapter.service_calls(&json!("OFF"));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].get::<String>("hvac_mode").as_deref(), Some("off"));

        let adapter = make_test_adapter(json!({"supports_hvac_modes": false}));
        let calls = adapter.service_calls(&json!(19.0));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].service_id(), "climate.set_temperature");
    }

    #[test]
    fn test_observed_value() {
        let adapter = make_test_adapter(json!({}));
        assert_eq!(
            adapter.observed_value(&make_test_state("heat", json!(21))),
            Some(json!(21.0))
        );
        assert_eq!(
            adapter.observed_value(&make_test_state("off", Value::Null)),
            Some(json!("OFF"))
        );
        assert_eq!(adapter.observed_value(&make_test_state("cool", json!(21))), None);
        assert_eq!(adapter.observed_value(&make_test_state("heat", Value::Null)), None);

        let adapter = make_test_adapter(json!({"supports_hvac_modes": false}));
        assert_eq!(
            adapter.observed_value(&make_test_state("whatever", json!("19.5"))),
            Some(json!(19.5))
        );
    }
}
