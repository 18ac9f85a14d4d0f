//! In-process host platform for Schedy
//!
//! Implements the host collaborator contracts of `schedy-core` without an
//! external home-automation system: states live in memory, service calls are
//! recorded and optionally emulated, and timers run either on tokio or on a
//! virtual clock that tests and simulations advance explicitly.

mod event_bus;
mod services;
mod state_store;
mod timers;

use std::sync::Arc;

use chrono::NaiveDateTime;
use schedy_core::Host;

pub use event_bus::EventBus;
pub use services::{ServiceHandler, ServiceRegistry};
pub use state_store::MemoryStateStore;
pub use timers::{ManualTimers, TokioTimers};

/// A complete in-process host driven by a virtual clock
///
/// Keeps the concrete collaborators so callers can inspect recorded service
/// calls and advance time, while handing out the trait-object [`Host`].
#[derive(Clone)]
pub struct SimulatedHost {
    pub bus: Arc<EventBus>,
    pub states: Arc<MemoryStateStore>,
    pub services: Arc<ServiceRegistry>,
    pub timers: Arc<ManualTimers>,
}

impl SimulatedHost {
    /// Create a host whose clock starts at `start`
    pub fn new(start: NaiveDateTime) -> Self {
        let bus = Arc::new(EventBus::new());
        Self {
            states: Arc::new(MemoryStateStore::new(Arc::clone(&bus))),
            services: Arc::new(ServiceRegistry::new()),
            timers: Arc::new(ManualTimers::new(start)),
            bus,
        }
    }

    /// Let climate and switch services update the states they target
    pub fn with_device_emulation(self) -> Self {
        self.services.emulate_devices(Arc::clone(&self.states));
        self
    }

    pub fn host(&self) -> Host {
        Host::new(
            self.states.clone(),
            self.services.clone(),
            self.timers.clone(),
        )
    }
}
