//! Error types for expression execution and result combination

use thiserror::Error;

/// Result type for expression execution
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Errors raised while executing an expression
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    /// Failed to compile the expression
    #[error("invalid expression syntax: {message}")]
    SyntaxError { message: String },

    /// The expression failed at runtime
    #[error("expression failed: {message}")]
    ExecutionError { message: String },

    /// A result constructor was called with bad arguments
    #[error("invalid argument to {function}: {message}")]
    InvalidArgument {
        function: &'static str,
        message: String,
    },

    /// IncludeSchedule referenced a snippet that doesn't exist
    #[error("unknown schedule snippet '{0}'")]
    UnknownSnippet(String),

    /// The expression returned something that can't be a value
    #[error("unsupported result: {0}")]
    UnsupportedResult(String),
}

impl From<minijinja::Error> for ExpressionError {
    fn from(err: minijinja::Error) -> Self {
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => ExpressionError::SyntaxError {
                message: err.to_string(),
            },
            _ => ExpressionError::ExecutionError {
                message: err.to_string(),
            },
        }
    }
}

/// A preliminary modifier couldn't be applied to a value
#[derive(Debug, Clone, Error, PartialEq)]
#[error("can't apply {modifier} to {value}: {reason}")]
pub struct CombineError {
    pub modifier: String,
    pub value: serde_json::Value,
    pub reason: String,
}

impl CombineError {
    pub fn new(
        modifier: impl Into<String>,
        value: &serde_json::Value,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            modifier: modifier.into(),
            value: value.clone(),
            reason: reason.into(),
        }
    }
}

/// A value was rejected by the active actor type
#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid value {value}: {reason}")]
pub struct ValidationError {
    pub value: serde_json::Value,
    pub reason: String,
}

impl ValidationError {
    pub fn new(value: &serde_json::Value, reason: impl Into<String>) -> Self {
        Self {
            value: value.clone(),
            reason: reason.into(),
        }
    }
}
