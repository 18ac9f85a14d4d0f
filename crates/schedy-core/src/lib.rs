//! Core types for Schedy
//!
//! This crate provides the vocabulary shared by every other Schedy crate:
//! entity ids and states as seen on the host platform, events, service calls,
//! and the contracts of the host collaborators (state store, service caller,
//! timer service) the scheduling engine is driven by.

mod context;
mod entity_id;
mod event;
mod host;
mod service_call;
mod state;

pub use context::Context;
pub use entity_id::{slugify, EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use host::{Host, ServiceCaller, StateStore, TimerCallback, TimerHandle, TimerService};
pub use service_call::ServiceCall;
pub use state::EntityState;

/// State value used when nothing is known about an entity
pub const STATE_UNKNOWN: &str = "unknown";

/// State value used when an entity can't be reached
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Event types and payloads understood by Schedy
pub mod events {
    use serde::{Deserialize, Serialize};

    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type asking rooms to re-evaluate their schedules
    pub const SCHEDY_REEVALUATE: &str = "schedy_reevaluate";

    /// Event type setting a value manually
    pub const SCHEDY_SET_VALUE: &str = "schedy_set_value";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<EntityState>,
        pub new_state: Option<EntityState>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// How a re-evaluation treats pending overrides
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ReevaluateMode {
        /// Re-apply the schedule, keeping manual overrides
        #[default]
        Reevaluate,
        /// Drop manual overrides and overlays, then re-apply
        Reset,
    }

    /// Data for SCHEDY_REEVALUATE events
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct ReevaluateData {
        /// Restricts the event to one app instance
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub app_name: Option<String>,
        /// Restricts the event to one room
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub room: Option<String>,
        #[serde(default)]
        pub mode: ReevaluateMode,
    }

    impl EventData for ReevaluateData {
        fn event_type() -> &'static str {
            SCHEDY_REEVALUATE
        }
    }

    /// Data for SCHEDY_SET_VALUE events
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct SetValueData {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub app_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub room: Option<String>,
        /// Expression source, only honoured when expressions from events are enabled
        #[serde(default, alias = "x", skip_serializing_if = "Option::is_none")]
        pub expression: Option<String>,
        #[serde(default, alias = "v", skip_serializing_if = "Option::is_none")]
        pub value: Option<serde_json::Value>,
        #[serde(default)]
        pub force_resend: bool,
        /// Minutes until the schedule takes over again
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub rescheduling_delay: Option<f64>,
    }

    impl EventData for SetValueData {
        fn event_type() -> &'static str {
            SCHEDY_SET_VALUE
        }
    }
}
