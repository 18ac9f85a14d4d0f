//! Error types for schedule construction

use thiserror::Error;

/// Errors raised while building rules and schedules
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid time '{0}', expected HH:MM[:SS]")]
    InvalidTime(String),

    #[error("invalid rule time '{0}', expected [HH:MM[:SS]][{{+-}}Nd]")]
    InvalidRuleTime(String),

    #[error("invalid range spec '{spec}': {reason}")]
    InvalidRangeSpec { spec: String, reason: String },

    #[error("invalid {kind} constraint: {reason}")]
    InvalidConstraint { kind: &'static str, reason: String },

    #[error("rule {rule} has an empty time window")]
    EmptyWindow { rule: String },

    #[error("rule {rule} can't have both an expression and a value")]
    ExpressionAndValue { rule: String },

    #[error("no expression or value defined along rule path {path}")]
    MissingValue { path: String },
}

/// Result type for schedule construction
pub type ScheduleResult<T> = Result<T, ScheduleError>;
