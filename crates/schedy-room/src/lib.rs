//! Room orchestration for Schedy
//!
//! A [`Room`] owns the actors of one space and the schedule driving them. It
//! re-evaluates the schedule when timers fire or events ask for it, keeps
//! manual overrides alive until their re-scheduling deadline, saves and
//! restores overlays around values marked `OVERLAY`, and replicates values
//! changed at one actor to the others.
//!
//! Every public entry point runs inside a [`Transaction`](transaction): the
//! room state sits behind a re-entrant lock, service calls are queued while
//! state is borrowed, and the persisted room snapshot is published once when
//! the outermost transaction ends.

mod error;
mod room;
mod settings;
mod snapshot;
mod transaction;

pub use error::{RoomError, RoomResult};
pub use room::{ManualValue, Room, ACTOR_INIT_RETRY_SECS};
pub use settings::{ReschedulingDelay, RoomSettings};
pub use snapshot::{OverlaySnapshot, RoomSnapshot, PERSIST_DOMAIN};
