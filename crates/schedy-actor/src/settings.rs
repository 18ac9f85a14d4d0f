//! Settings shared by all actor types

use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ActorError, ActorResult};

const DEFAULT_SEND_RETRIES: u32 = 10;
const DEFAULT_SEND_RETRY_INTERVAL: u64 = 30;

/// Delivery settings of one actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorSettings {
    pub friendly_name: Option<String>,
    /// Re-sends after the first push before giving up
    pub send_retries: u32,
    pub send_retry_interval: Duration,
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            friendly_name: None,
            send_retries: DEFAULT_SEND_RETRIES,
            send_retry_interval: Duration::from_secs(DEFAULT_SEND_RETRY_INTERVAL),
        }
    }
}

#[derive(Deserialize)]
struct RawSettings {
    #[serde(default)]
    friendly_name: Option<String>,
    #[serde(default = "default_send_retries")]
    send_retries: u32,
    #[serde(default = "default_send_retry_interval")]
    send_retry_interval: u64,
}

fn default_send_retries() -> u32 {
    DEFAULT_SEND_RETRIES
}

fn default_send_retry_interval() -> u64 {
    DEFAULT_SEND_RETRY_INTERVAL
}

impl ActorSettings {
    /// Read the common keys of an actor configuration, ignoring type-specific ones
    pub fn from_config(entity_id: &str, config: &Value) -> ActorResult<Self> {
        let raw: RawSettings = serde_json::from_value(config.clone())
            .map_err(|e| ActorError::invalid_config(entity_id, e.to_string()))?;
        if raw.send_retry_interval == 0 {
            return Err(ActorError::invalid_config(
                entity_id,
                "send_retry_interval must be at least 1 second",
            ));
        }
        Ok(Self {
            friendly_name: raw.friendly_name,
            send_retries: raw.send_retries,
            send_retry_interval: Duration::from_secs(raw.send_retry_interval),
        })
    }

    /// The retry interval as a timer delay
    ///
    /// Intervals too long for the timer clock fall back to the default.
    pub fn retry_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.send_retry_interval)
            .ok()
            .filter(|delta| *delta <= TimeDelta::days(365))
            .unwrap_or_else(|| TimeDelta::seconds(DEFAULT_SEND_RETRY_INTERVAL as i64))
    }
}

/// Recursively merge `overlay` into `base`
///
/// Objects are merged key by key; any other value in `overlay` replaces the
/// one in `base`.
pub fn merge_config(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_config(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
