//! Contracts of the host platform collaborators
//!
//! The scheduling engine never talks to the platform directly. It reads and
//! writes entity states through a [`StateStore`], pushes values through a
//! [`ServiceCaller`] and defers work through a [`TimerService`]. All of them
//! are synchronous and must return quickly: callers may hold a room lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};

use crate::{EntityId, EntityState, ServiceCall};

/// Callback run when a timer fires
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Handle of a scheduled timer, used to cancel it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Read and write access to entity states
pub trait StateStore: Send + Sync {
    fn get(&self, entity_id: &EntityId) -> Option<EntityState>;

    /// Every known state, in no particular order
    fn all(&self) -> Vec<EntityState>;

    fn set(
        &self,
        entity_id: &EntityId,
        state: &str,
        attributes: HashMap<String, serde_json::Value>,
    );
}

/// Fire-and-forget invocation of host services
pub trait ServiceCaller: Send + Sync {
    fn call(&self, call: ServiceCall);
}

/// One-shot timers on the local wall clock
pub trait TimerService: Send + Sync {
    /// Current local wall-clock time
    fn now(&self) -> NaiveDateTime;

    /// Run `callback` once at `when`; instants in the past fire as soon as possible
    fn run_at(&self, when: NaiveDateTime, callback: TimerCallback) -> TimerHandle;

    fn run_in(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        self.run_at(self.now() + delay, callback)
    }

    /// Cancel a timer; cancelling a fired or unknown timer is a no-op
    fn cancel(&self, handle: TimerHandle);
}

/// Bundle of host collaborators handed to rooms and apps
#[derive(Clone)]
pub struct Host {
    pub states: Arc<dyn StateStore>,
    pub services: Arc<dyn ServiceCaller>,
    pub timers: Arc<dyn TimerService>,
}

impl Host {
    pub fn new(
        states: Arc<dyn StateStore>,
        services: Arc<dyn ServiceCaller>,
        timers: Arc<dyn TimerService>,
    ) -> Self {
        Self {
            states,
            services,
            timers,
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.timers.now()
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}
