//! Value semantics imposed by the active actor type

use serde_json::Value;

use crate::error::{CombineError, ValidationError};
use crate::result::Preliminary;

/// How values are validated, compared and combined
///
/// Implemented by every actor type. The evaluator validates each final value
/// and every intermediate result of applying a modifier through it.
pub trait ValueRules: Send + Sync {
    /// Check and normalize a candidate value
    fn validate_value(&self, value: Value) -> Result<Value, ValidationError>;

    /// Whether two valid values mean the same thing
    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        a == b
    }

    /// Apply a preliminary modifier to a valid value
    fn combine(&self, modifier: &Preliminary, value: &Value) -> Result<Value, CombineError> {
        modifier.combine_with(value)
    }
}

/// Accepts every value but null
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyValue;

impl ValueRules for AnyValue {
    fn validate_value(&self, value: Value) -> Result<Value, ValidationError> {
        if value.is_null() {
            return Err(ValidationError::new(&value, "null is not a value"));
        }
        Ok(value)
    }
}
