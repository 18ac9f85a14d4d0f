//! Actors for Schedy
//!
//! An [`Actor`] is one external endpoint (a thermostat, a switch, ...) whose
//! value a room drives. Each actor pairs an [`ActorType`], which decides how
//! values are validated, compared and persisted, with an [`ActorAdapter`]
//! that maps a value to service calls and reads it back from entity states.
//! Delivery runs through a [`DeliveryState`] machine that re-sends a value
//! until the entity confirms it or the retry budget is spent.

mod actor;
mod actor_type;
mod delivery;
mod error;
mod generic;
mod settings;
mod thermostat;

pub use actor::{Actor, Observation, ResendFactory};
pub use actor_type::{
    actor_type_by_name, actor_type_names, flat_attribute, ActorAdapter, ActorType, ActorTypeRules,
};
pub use delivery::{DeliveryState, Tick};
pub use error::{ActorError, ActorResult};
pub use generic::{GenericActorType, SwitchActorType};
pub use settings::{merge_config, ActorSettings};
pub use thermostat::{Temp, ThermostatActorType, TEMP_DELTA};
