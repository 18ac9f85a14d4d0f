//! Actor error types

use thiserror::Error;

/// Result type for actor operations
pub type ActorResult<T> = Result<T, ActorError>;

/// Errors raised while configuring actors or (de)serializing their values
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("unknown actor type: {0}")]
    UnknownType(String),

    #[error("invalid configuration for actor {entity_id}: {reason}")]
    InvalidConfig { entity_id: String, reason: String },

    #[error("can't serialize value {value}: {reason}")]
    Serialize {
        value: serde_json::Value,
        reason: String,
    },

    #[error("can't deserialize value {input:?}: {reason}")]
    Deserialize { input: String, reason: String },
}

impl ActorError {
    pub fn invalid_config(entity_id: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            entity_id: entity_id.to_string(),
            reason: reason.into(),
        }
    }
}
