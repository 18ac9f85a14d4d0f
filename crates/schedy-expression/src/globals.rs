//! Functions available to expressions
//!
//! Result constructors wrap an [`ExprResult`] into a minijinja object so it
//! survives the trip through the template engine; [`to_result`] unwraps it on
//! the way out.

use std::collections::HashMap;
use std::sync::Arc;

use minijinja::value::{Kwargs, Object, ObjectRepr, Rest};
use minijinja::{context, Environment, Error, ErrorKind, Value};
use schedy_core::{EntityId, StateStore};
use schedy_schedule::Schedule;

use crate::error::{CombineError, ExpressionError, ExpressionResult};
use crate::result::{Control, ExprResult, Marker, Postprocessor, Preliminary};

/// An evaluation result travelling through minijinja
#[derive(Debug)]
pub(crate) struct ResultObject(pub(crate) ExprResult);

impl Object for ResultObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }
}

fn wrap(result: impl Into<ExprResult>) -> Value {
    Value::from_object(ResultObject(result.into()))
}

fn invalid_argument(function: &str, message: impl std::fmt::Display) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!("invalid argument to {function}: {message}"),
    )
}

fn to_json(function: &str, value: &Value) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| invalid_argument(function, e))
}

/// Turn whatever an expression produced into a result
pub(crate) fn to_result(value: &Value) -> ExpressionResult<ExprResult> {
    if value.is_undefined() || value.is_none() {
        return Ok(ExprResult::None);
    }
    if let Some(result) = value.downcast_object_ref::<ResultObject>() {
        return Ok(result.0.clone());
    }
    serde_json::to_value(value)
        .map(ExprResult::from_value)
        .map_err(|e| ExpressionError::UnsupportedResult(e.to_string()))
}

pub(crate) fn add(operand: Value) -> Result<Value, Error> {
    Ok(wrap(Preliminary::Add(to_json("Add", &operand)?)))
}

pub(crate) fn and(operand: Value) -> Result<Value, Error> {
    Ok(wrap(Preliminary::And(to_json("And", &operand)?)))
}

pub(crate) fn multiply(operand: Value) -> Result<Value, Error> {
    Ok(wrap(Preliminary::Multiply(to_json("Multiply", &operand)?)))
}

pub(crate) fn or(operand: Value) -> Result<Value, Error> {
    Ok(wrap(Preliminary::Or(to_json("Or", &operand)?)))
}

pub(crate) fn negate() -> Value {
    wrap(Preliminary::Negate)
}

pub(crate) fn abort() -> Value {
    wrap(Control::Abort)
}

pub(crate) fn skip() -> Value {
    wrap(Control::Skip)
}

pub(crate) fn inherit() -> Value {
    wrap(Control::Inherit)
}

pub(crate) fn break_levels(levels: Option<u32>) -> Result<Value, Error> {
    ExprResult::breaking(levels.unwrap_or(1))
        .map(wrap)
        .map_err(|e| invalid_argument("Break", e))
}

pub(crate) fn mark(result: Value, markers: Rest<String>) -> Result<Value, Error> {
    let inner = to_result(&result).map_err(|e| invalid_argument("Mark", e))?;
    let markers = markers
        .iter()
        .map(|m| m.parse::<Marker>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid_argument("Mark", e))?;
    Ok(wrap(ExprResult::marked(inner, markers)))
}

pub(crate) fn include_schedule(
    snippets: &HashMap<String, Arc<Schedule>>,
    name: &str,
) -> Result<Value, Error> {
    snippets
        .get(name)
        .map(|schedule| wrap(Control::IncludeSchedule(Arc::clone(schedule))))
        .ok_or_else(|| {
            invalid_argument(
                "IncludeSchedule",
                ExpressionError::UnknownSnippet(name.to_string()),
            )
        })
}

/// `Postprocess("value | round(1)")`: an expression over `value`
pub(crate) fn postprocess(source: String) -> Result<Value, Error> {
    let scratch = Environment::new();
    scratch.compile_expression(&source)?;
    let label = source.clone();
    Ok(wrap(Preliminary::Postprocess(Postprocessor::new(
        label,
        move |value| run_postprocess(&source, value),
    ))))
}

fn run_postprocess(
    source: &str,
    value: &serde_json::Value,
) -> Result<serde_json::Value, CombineError> {
    let fail = |reason: String| CombineError::new(format!("Postprocess({source:?})"), value, reason);
    let env = Environment::new();
    let expr = env
        .compile_expression(source)
        .map_err(|e| fail(e.to_string()))?;
    let out = expr
        .eval(context! { value => Value::from_serialize(value) })
        .map_err(|e| fail(e.to_string()))?;
    if out.is_undefined() || out.is_none() {
        return Err(fail("postprocessor returned nothing".to_string()));
    }
    serde_json::to_value(&out).map_err(|e| fail(e.to_string()))
}

/// Round `value` to the nearest multiple of `step`
pub(crate) fn round_to_step(value: f64, step: f64, decimals: Option<i32>) -> Result<Value, Error> {
    if step <= 0.0 {
        return Err(invalid_argument("round_to_step", "step must be positive"));
    }
    let mut rounded = (value / step).round() * step;
    if let Some(decimals) = decimals {
        let factor = 10f64.powi(decimals);
        rounded = (rounded * factor).round() / factor;
    }
    Ok(Value::from(rounded))
}

/// Whether a sequence, mapping or string has no items; none counts as empty
pub(crate) fn is_empty(value: Value) -> Result<bool, Error> {
    if value.is_undefined() || value.is_none() {
        return Ok(true);
    }
    let mut items = value
        .try_iter()
        .map_err(|e| invalid_argument("is_empty", e))?;
    Ok(items.next().is_none())
}

fn parse_entity_id(function: &str, entity_id: &str) -> Result<EntityId, Error> {
    entity_id
        .parse()
        .map_err(|e| invalid_argument(function, e))
}

/// `state(entity_id, attribute=none)`
pub(crate) fn state(
    states: &dyn StateStore,
    entity_id: &str,
    attribute: Option<&str>,
) -> Result<Value, Error> {
    let id = parse_entity_id("state", entity_id)?;
    let Some(state) = states.get(&id) else {
        return Ok(Value::from(()));
    };
    Ok(match attribute {
        None => Value::from(state.state),
        Some(attribute) => state
            .attributes
            .get(attribute)
            .map(Value::from_serialize)
            .unwrap_or_else(|| Value::from(())),
    })
}

pub(crate) fn is_state(
    states: &dyn StateStore,
    entity_id: &str,
    expected: &str,
) -> Result<bool, Error> {
    let id = parse_entity_id("is_state", entity_id)?;
    Ok(states
        .get(&id)
        .map_or(false, |state| state.state.eq_ignore_ascii_case(expected)))
}

pub(crate) fn has_value(states: &dyn StateStore, entity_id: &str) -> Result<bool, Error> {
    let id = parse_entity_id("has_value", entity_id)?;
    Ok(states
        .get(&id)
        .map_or(false, |state| state.is_known()))
}

/// `filter_entities(entities=none, **criteria)`
///
/// `entities` is a full entity id or a domain, a list of those, or none for
/// every known entity. `state` criteria match the state, every other
/// criterion the attribute of that name. Matching ids are returned sorted.
pub(crate) fn filter_entities(
    states: &dyn StateStore,
    entities: Option<Value>,
    criteria: Kwargs,
) -> Result<Value, Error> {
    let selectors: Option<Vec<String>> = match entities {
        None => None,
        Some(value) if value.is_none() || value.is_undefined() => None,
        Some(value) => match value.as_str() {
            Some(selector) => Some(vec![selector.to_string()]),
            None => Some(
                value
                    .try_iter()
                    .map_err(|e| invalid_argument("filter_entities", e))?
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            invalid_argument("filter_entities", "entities must be strings")
                        })
                    })
                    .collect::<Result<_, _>>()?,
            ),
        },
    };

    let mut wanted = Vec::new();
    for key in criteria.args() {
        let expected: Value = criteria.get(key)?;
        wanted.push((key.to_string(), to_json("filter_entities", &expected)?));
    }

    let selected = |entity_id: &EntityId| {
        selectors.as_ref().map_or(true, |selectors| {
            selectors.iter().any(|selector| {
                if selector.contains('.') {
                    entity_id.to_string() == *selector
                } else {
                    entity_id.domain() == selector
                }
            })
        })
    };

    let mut matching: Vec<String> = states
        .all()
        .into_iter()
        .filter(|state| selected(&state.entity_id))
        .filter(|state| {
            wanted.iter().all(|(key, expected)| {
                if key == "state" {
                    expected.as_str() == Some(state.state.as_str())
                } else {
                    state
                        .attributes
                        .get(key)
                        .map_or(false, |actual| json_eq(actual, expected))
                }
            })
        })
        .map(|state| state.entity_id.to_string())
        .collect();
    matching.sort();
    Ok(Value::from(matching))
}

/// Equality treating `21` and `21.0` alike
fn json_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}
