//! Events: a type name, a payload and the context that caused them

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::Context;

/// Payload with a fixed event type name
pub trait EventData: Clone + Send + Sync + 'static {
    fn event_type() -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    pub event_type: EventType,
    pub data: T,
    pub time_fired: DateTime<Utc>,
    pub context: Context,
}

impl<T> Event<T> {
    pub fn new(event_type: impl Into<EventType>, data: T, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            time_fired: Utc::now(),
            context,
        }
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type.as_str() == event_type
    }
}

impl Event<serde_json::Value> {
    /// The payload as `T`, if this event is of `T`'s type and the payload fits
    pub fn parse<T: EventData + DeserializeOwned>(&self) -> Option<T> {
        if !self.is(T::event_type()) {
            return None;
        }
        T::deserialize(&self.data).ok()
    }
}
