//! The result algebra of rule evaluation
//!
//! Evaluating a rule yields nothing, a final value, a preliminary modifier or a
//! control directive. Modifiers are pure transforms over JSON values; they keep
//! the type of the value they are applied to.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use schedy_schedule::Schedule;
use serde_json::Value;

use crate::error::{CombineError, ExpressionError};

/// Outcome of evaluating a single rule
#[derive(Debug, Clone)]
pub enum ExprResult {
    /// The rule yielded nothing; fall back to less specific rules
    None,
    /// A final value
    Value(Value),
    /// A transform waiting for a final value
    Preliminary(Preliminary),
    /// A directive steering the evaluation
    Control(Control),
}

impl ExprResult {
    /// Classify a literal value; `null` means no result
    pub fn from_value(value: Value) -> Self {
        if value.is_null() {
            ExprResult::None
        } else {
            ExprResult::Value(value)
        }
    }

    /// Wrap `inner` with markers, merging with markers it already carries
    pub fn marked(inner: ExprResult, markers: impl IntoIterator<Item = Marker>) -> Self {
        let mut markers: BTreeSet<Marker> = markers.into_iter().collect();
        let inner = match inner {
            ExprResult::Control(Control::Mark(nested, nested_markers)) => {
                markers.extend(nested_markers);
                *nested
            }
            other => other,
        };
        ExprResult::Control(Control::Mark(Box::new(inner), markers))
    }

    /// Break out of `levels` ancestor levels; zero levels are rejected
    pub fn breaking(levels: u32) -> Result<Self, ExpressionError> {
        if levels == 0 {
            return Err(ExpressionError::InvalidArgument {
                function: "Break",
                message: "levels must be at least 1".to_string(),
            });
        }
        Ok(ExprResult::Control(Control::Break(levels)))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ExprResult::None)
    }
}

impl From<Preliminary> for ExprResult {
    fn from(preliminary: Preliminary) -> Self {
        ExprResult::Preliminary(preliminary)
    }
}

impl From<Control> for ExprResult {
    fn from(control: Control) -> Self {
        ExprResult::Control(control)
    }
}

/// Tags attached to a result with `Mark`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Marker {
    /// The value temporarily overlays whatever the room was doing
    Overlay,
    /// Like `Overlay`, but the overlaid value also comes back when the
    /// schedule later yields no result at all
    OverlayRevertOnNoResult,
}

impl Marker {
    /// Whether the marker starts an overlay
    pub fn is_overlay(&self) -> bool {
        matches!(self, Marker::Overlay | Marker::OverlayRevertOnNoResult)
    }
}

impl FromStr for Marker {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overlay" => Ok(Marker::Overlay),
            "overlay_revert_on_no_result" => Ok(Marker::OverlayRevertOnNoResult),
            _ => Err(ExpressionError::InvalidArgument {
                function: "Mark",
                message: format!("unknown marker '{s}'"),
            }),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::Overlay => f.write_str("OVERLAY"),
            Marker::OverlayRevertOnNoResult => f.write_str("OVERLAY_REVERT_ON_NO_RESULT"),
        }
    }
}

/// Directives altering the search instead of yielding a value
#[derive(Debug, Clone)]
pub enum Control {
    /// Stop evaluating; the previous value stays in effect
    Abort,
    /// Drop the remaining alternatives below the given number of ancestor levels
    Break(u32),
    /// Drop the current path and go on with the next one
    Skip,
    /// Use the result of the next less specific rule of the current path
    Inherit,
    /// Continue with the rules of another schedule in place of the current rule
    IncludeSchedule(Arc<Schedule>),
    /// An inner result carrying markers
    Mark(Box<ExprResult>, BTreeSet<Marker>),
}

/// A function applied to the final value by `Postprocess`
#[derive(Clone)]
pub struct Postprocessor {
    label: String,
    func: Arc<dyn Fn(&Value) -> Result<Value, CombineError> + Send + Sync>,
}

impl Postprocessor {
    pub fn new(
        label: impl Into<String>,
        func: impl Fn(&Value) -> Result<Value, CombineError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn apply(&self, value: &Value) -> Result<Value, CombineError> {
        (self.func)(value)
    }
}

impl fmt::Debug for Postprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Postprocessor").field(&self.label).finish()
    }
}

/// Transforms queued until a final value is known
#[derive(Debug, Clone)]
pub enum Preliminary {
    Add(Value),
    And(Value),
    Multiply(Value),
    Negate,
    Or(Value),
    Postprocess(Postprocessor),
}

impl fmt::Display for Preliminary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preliminary::Add(v) => write!(f, "Add({v})"),
            Preliminary::And(v) => write!(f, "And({v})"),
            Preliminary::Multiply(v) => write!(f, "Multiply({v})"),
            Preliminary::Negate => f.write_str("Negate()"),
            Preliminary::Or(v) => write!(f, "Or({v})"),
            Preliminary::Postprocess(p) => write!(f, "Postprocess({:?})", p.label()),
        }
    }
}

impl Preliminary {
    /// Apply the transform to a final value
    pub fn combine_with(&self, value: &Value) -> Result<Value, CombineError> {
        let fail = |reason: &str| CombineError::new(self.to_string(), value, reason);
        match self {
            Preliminary::Add(operand) => match (value, operand) {
                (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
                _ => arithmetic(value, operand, |a, b| a + b, |a, b| a.checked_add(b))
                    .ok_or_else(|| fail("operands must both be numbers or strings")),
            },
            Preliminary::Multiply(operand) => {
                arithmetic(value, operand, |a, b| a * b, |a, b| a.checked_mul(b))
                    .ok_or_else(|| fail("operands must both be numbers"))
            }
            Preliminary::And(operand) => {
                if is_truthy(value) {
                    cast_like(value, operand).ok_or_else(|| fail("incompatible operand type"))
                } else {
                    Ok(value.clone())
                }
            }
            Preliminary::Or(operand) => {
                if is_truthy(value) {
                    Ok(value.clone())
                } else {
                    cast_like(value, operand).ok_or_else(|| fail("incompatible operand type"))
                }
            }
            Preliminary::Negate => negate(value).ok_or_else(|| fail("value can't be negated")),
            Preliminary::Postprocess(postprocessor) => postprocessor.apply(value),
        }
    }
}

/// Truthiness of a JSON value: null, false, zero and empty collections are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Arithmetic keeping the type of `value`; integers stay integers
fn arithmetic(
    value: &Value,
    operand: &Value,
    float_op: impl Fn(f64, f64) -> f64,
    int_op: impl Fn(i64, i64) -> Option<i64>,
) -> Option<Value> {
    let rhs = as_number(operand)?;
    match value {
        Value::Number(n) if n.is_i64() => {
            let lhs = n.as_i64()?;
            match operand.as_i64() {
                Some(rhs) => int_op(lhs, rhs).map(Value::from),
                None => {
                    let result = float_op(lhs as f64, rhs).trunc();
                    result.is_finite().then(|| Value::from(result as i64))
                }
            }
        }
        Value::Number(n) => {
            let result = float_op(n.as_f64()?, rhs);
            serde_json::Number::from_f64(result).map(Value::Number)
        }
        _ => None,
    }
}

/// Convert `operand` to the type of `like`
fn cast_like(like: &Value, operand: &Value) -> Option<Value> {
    match like {
        Value::Bool(_) => Some(Value::Bool(is_truthy(operand))),
        Value::Number(n) if n.is_i64() => match operand {
            Value::Bool(b) => Some(Value::from(i64::from(*b))),
            Value::Number(o) => o
                .as_i64()
                .or_else(|| o.as_f64().map(|f| f.trunc() as i64))
                .map(Value::from),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        Value::Number(_) => match operand {
            Value::Bool(b) => Some(Value::from(if *b { 1.0 } else { 0.0 })),
            Value::Number(o) => o.as_f64().map(Value::from),
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
            _ => None,
        },
        Value::String(_) => match operand {
            Value::String(s) => Some(Value::String(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
            other => Some(Value::String(other.to_string())),
        },
        _ => None,
    }
}

fn negate(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::Bool(!b)),
        Value::String(s) if s == "on" => Some(Value::from("off")),
        Value::String(s) if s == "off" => Some(Value::from("on")),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.checked_neg().map(Value::from),
            None => n.as_f64().map(|f| Value::from(-f)),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_keeps_value_type() {
        assert_eq!(Preliminary::Add(json!(2)).combine_with(&json!(5)).unwrap(), json!(7));
        assert_eq!(
            Preliminary::Add(json!(2.5)).combine_with(&json!(5)).unwrap(),
            json!(7)
        );
        assert_eq!(
            Preliminary::Add(json!(1)).combine_with(&json!(20.5)).unwrap(),
            json!(21.5)
        );
        assert_eq!(
            Preliminary::Add(json!("_x")).combine_with(&json!("a")).unwrap(),
            json!("a_x")
        );
    }

    #[test]
    fn test_incompatible_operands() {
        assert!(Preliminary::Add(json!("1")).combine_with(&json!(5)).is_err());
        assert!(Preliminary::Multiply(json!(2)).combine_with(&json!("on")).is_err());
        assert!(Preliminary::Negate.combine_with(&json!("heat")).is_err());
        assert!(Preliminary::And(json!([1])).combine_with(&json!(3)).is_err());
    }

    #[test]
    fn test_multiply() {
        assert_eq!(
            Preliminary::Multiply(json!(3)).combine_with(&json!(7)).unwrap(),
            json!(21)
        );
        assert_eq!(
            Preliminary::Multiply(json!(0.5)).combine_with(&json!(21.0)).unwrap(),
            json!(10.5)
        );
    }

    #[test]
    fn test_and_or() {
        assert_eq!(
            Preliminary::And(json!(false)).combine_with(&json!(true)).unwrap(),
            json!(false)
        );
        assert_eq!(
            Preliminary::And(json!(1)).combine_with(&json!(0)).unwrap(),
            json!(0)
        );
        assert_eq!(
            Preliminary::Or(json!(true)).combine_with(&json!(false)).unwrap(),
            json!(true)
        );
        assert_eq!(
            Preliminary::Or(json!("off")).combine_with(&json!("on")).unwrap(),
            json!("on")
        );
        assert_eq!(
            Preliminary::Or(json!("2.5")).combine_with(&json!(0.0)).unwrap(),
            json!(2.5)
        );
    }

    #[test]
    fn test_negate_specials() {
        assert_eq!(Preliminary::Negate.combine_with(&json!(true)).unwrap(), json!(false));
        assert_eq!(Preliminary::Negate.combine_with(&json!("on")).unwrap(), json!("off"));
        assert_eq!(Preliminary::Negate.combine_with(&json!("off")).unwrap(), json!("on"));
        assert_eq!(Preliminary::Negate.combine_with(&json!(4)).unwrap(), json!(-4));
        assert_eq!(Preliminary::Negate.combine_with(&json!(1.5)).unwrap(), json!(-1.5));
    }

    #[test]
    fn test_postprocess() {
        let clamp = Postprocessor::new("clamp", |v: &Value| {
            Ok(json!(v.as_f64().unwrap_or_default().min(25.0)))
        });
        assert_eq!(
            Preliminary::Postprocess(clamp).combine_with(&json!(30.0)).unwrap(),
            json!(25.0)
        );
    }

    #[test]
    fn test_nested_marks_merge() {
        let inner = ExprResult::marked(ExprResult::Value(json!(1)), [Marker::Overlay]);
        let outer = ExprResult::marked(inner, []);
        match outer {
            ExprResult::Control(Control::Mark(inner, markers)) => {
                assert!(markers.contains(&Marker::Overlay));
                assert!(matches!(*inner, ExprResult::Value(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_marker_parsing() {
        assert_eq!("overlay".parse::<Marker>().unwrap(), Marker::Overlay);
        assert_eq!("OVERLAY".parse::<Marker>().unwrap(), Marker::Overlay);
        let revert = "OVERLAY_REVERT_ON_NO_RESULT".parse::<Marker>().unwrap();
        assert_eq!(revert, Marker::OverlayRevertOnNoResult);
        assert!(revert.is_overlay());
        assert_eq!(revert.to_string(), "OVERLAY_REVERT_ON_NO_RESULT");
        assert!("underlay".parse::<Marker>().is_err());
        assert!(ExprResult::breaking(0).is_err());
        assert!(matches!(
            ExprResult::breaking(2).unwrap(),
            ExprResult::Control(Control::Break(2))
        ));
    }

    #[test]
    fn test_null_is_no_result() {
        assert!(ExprResult::from_value(Value::Null).is_none());
        assert!(!ExprResult::from_value(json!(0)).is_none());
    }
}
