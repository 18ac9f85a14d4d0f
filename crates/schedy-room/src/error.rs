//! Errors of manual room operations

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("expression '{expression}' failed: {reason}")]
    Expression { expression: String, reason: String },

    #[error("expression '{0}' yielded no value")]
    NoValue(String),

    #[error("invalid value {value}: {reason}")]
    InvalidValue { value: Value, reason: String },

    #[error("re-scheduling delay {0} is out of range")]
    DelayOutOfRange(String),
}

pub type RoomResult<T> = Result<T, RoomError>;
