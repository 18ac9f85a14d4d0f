//! App error types

use thiserror::Error;

/// Result type for app operations
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] schedy_config::ConfigError),

    #[error("invalid expression in {location}: {reason}")]
    Expression { location: String, reason: String },

    #[error("can't create actor {entity_id} of room {room}: {reason}")]
    Actor {
        room: String,
        entity_id: String,
        reason: String,
    },

    #[error("can't publish statistical parameter {name}: {reason}")]
    Statistics { name: String, reason: String },

    #[error("invalid {event} event: {reason}")]
    InvalidEvent { event: &'static str, reason: String },
}
