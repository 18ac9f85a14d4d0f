//! Schedy apps
//!
//! A [`SchedyApp`] owns the rooms built from one app definition. It routes
//! entity state changes to the actors owning the entities and to the rooms
//! watching them, and answers the `schedy_reevaluate` and
//! `schedy_set_value` events. [`SchedyApp::run`] drives it from an event bus
//! subscription until shut down.
//!
//! Apps may also publish statistical parameters over the actors of their
//! rooms, see [`StatisticalParameter`].

mod app;
mod error;
mod stats;
mod watch;

pub use app::SchedyApp;
pub use error::{AppError, AppResult};
pub use stats::{MinAvgMax, StatisticalParameter, STATS_DOMAIN, UPDATE_DELAY_SECS};
pub use watch::WatchTable;
