//! Actor handle combining type, adapter and delivery state

use std::fmt;
use std::sync::Arc;

use schedy_core::{EntityId, EntityState, Host, TimerCallback};
use serde_json::Value;
use tracing::{debug, info, instrument, trace, warn};

use crate::actor_type::{ActorAdapter, ActorType};
use crate::delivery::{DeliveryState, Tick};
use crate::error::ActorResult;
use crate::settings::ActorSettings;

/// Builds the callback of a resend timer from `(generation, left_tries)`
///
/// The owner of the actor supplies it, since only the owner knows how to get
/// back to the actor once the timer fires.
pub type ResendFactory<'a> = &'a dyn Fn(u64, u32) -> TimerCallback;

/// A value read from the entity
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub value: Value,
    /// Whether it differs from the previously observed value
    pub changed: bool,
}

/// One external endpoint driven by a room
pub struct Actor {
    entity_id: EntityId,
    settings: ActorSettings,
    actor_type: Arc<dyn ActorType>,
    adapter: Arc<dyn ActorAdapter>,
    delivery: DeliveryState,
    initialized: bool,
}

impl Actor {
    pub fn new(
        entity_id: EntityId,
        settings: ActorSettings,
        actor_type: Arc<dyn ActorType>,
        adapter: Arc<dyn ActorAdapter>,
    ) -> Self {
        Self {
            entity_id,
            settings,
            actor_type,
            adapter,
            delivery: DeliveryState::new(),
            initialized: false,
        }
    }

    /// Build an actor from its merged configuration
    pub fn from_config(
        entity_id: EntityId,
        actor_type: Arc<dyn ActorType>,
        config: &Value,
    ) -> ActorResult<Self> {
        let settings = ActorSettings::from_config(&entity_id.to_string(), config)?;
        let adapter = actor_type.create_adapter(&entity_id, config)?;
        Ok(Self::new(entity_id, settings, actor_type, adapter))
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn settings(&self) -> &ActorSettings {
        &self.settings
    }

    pub fn actor_type(&self) -> &Arc<dyn ActorType> {
        &self.actor_type
    }

    pub fn current_value(&self) -> Option<&Value> {
        self.delivery.current()
    }

    pub fn wanted_value(&self) -> Option<&Value> {
        self.delivery.wanted()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_sending(&self) -> bool {
        self.delivery.is_sending()
    }

    pub fn gave_up(&self) -> bool {
        self.delivery.gave_up()
    }

    pub fn is_synced(&self) -> bool {
        let actor_type = &self.actor_type;
        self.delivery.is_synced(|a, b| actor_type.values_equal(a, b))
    }

    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        self.actor_type.values_equal(a, b)
    }

    /// Restore a persisted wanted value without sending it
    pub fn restore_wanted_value(&mut self, value: Option<Value>) {
        let value = value.and_then(|v| match self.actor_type.validate_value(v) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(actor = %self, error = %e, "Discarding invalid persisted value");
                None
            }
        });
        self.delivery.set_wanted(value);
    }

    /// Fetch the initial state and start observing the entity
    ///
    /// Returns false if the entity has no state yet; the caller retries later.
    pub fn initialize(&mut self, host: &Host) -> bool {
        debug!(actor = %self, actor_type = self.actor_type.name(), "Initializing actor");
        let Some(state) = host.states.get(&self.entity_id) else {
            warn!(actor = %self, "Entity has no state, not initializing it now");
            return false;
        };
        self.adapter.check_plausibility(&state);
        self.notify_state(&state, host);
        self.initialized = true;
        true
    }

    /// Push `value` unless the actor already has or is sending it
    ///
    /// Returns whether a retry loop was started and the value the actor now
    /// wants, which may differ from `value` after filtering.
    #[instrument(skip(self, host, resend), fields(actor = %self))]
    pub fn set_value(
        &mut self,
        value: Value,
        force_resend: bool,
        host: &Host,
        resend: ResendFactory<'_>,
    ) -> (bool, Option<Value>) {
        let Some(value) = self.adapter.filter_set_value(value) else {
            return (false, self.delivery.wanted().cloned());
        };

        let actor_type = Arc::clone(&self.actor_type);
        if !self
            .delivery
            .request(value.clone(), force_resend, |a, b| actor_type.values_equal(a, b))
        {
            debug!(value = %value, "Not sending value redundantly");
            return (false, Some(value));
        }

        let (previous, generation) = self.delivery.begin();
        if let Some(handle) = previous {
            host.timers.cancel(handle);
        }
        self.resend(generation, self.settings.send_retries + 1, host, resend);
        (true, Some(value))
    }

    /// Run one attempt of the retry loop `generation`
    pub fn resend(&mut self, generation: u64, left_tries: u32, host: &Host, resend: ResendFactory<'_>) {
        match self.delivery.tick(generation, left_tries) {
            Tick::Stale => trace!(actor = %self, generation, "Ignoring stale resend timer"),
            Tick::GaveUp => {
                let retries = self.settings.send_retries;
                if retries > 0 {
                    warn!(actor = %self, retries, "Gave up sending value");
                } else {
                    debug!(actor = %self, "Value not confirmed, not retrying");
                }
            }
            Tick::Send { left_tries } => {
                let Some(value) = self.delivery.wanted().cloned() else {
                    return;
                };
                if left_tries <= self.settings.send_retries {
                    warn!(actor = %self, value = %value, "Re-sending value due to missing confirmation");
                }

                let interval = self.settings.retry_delta();
                let handle = host
                    .timers
                    .run_in(interval, resend(generation, left_tries - 1));
                self.delivery.armed(handle);

                info!(actor = %self, value = %value, left_tries, "Sending value");
                for call in self.adapter.service_calls(&value) {
                    trace!(actor = %self, service = %call.service_id(), data = %call.service_data, "Calling service");
                    host.services.call(call);
                }
            }
        }
    }

    /// Stop resending, e.g. when the room is torn down
    pub fn cancel_resending(&mut self, host: &Host) {
        if let Some(handle) = self.delivery.cancel() {
            host.timers.cancel(handle);
            debug!(actor = %self, "Cancelled re-sending timer");
        }
    }

    /// Process a new state of the entity
    ///
    /// Returns the value it represents; an acknowledgement of the wanted value
    /// ends the retry loop.
    pub fn notify_state(&mut self, state: &EntityState, host: &Host) -> Option<Observation> {
        let observed = self.adapter.observed_value(state)?;
        let value = match self.actor_type.validate_value(observed) {
            Ok(value) => value,
            Err(e) => {
                warn!(actor = %self, error = %e, "Ignoring invalid observed value");
                return None;
            }
        };

        let changed = self
            .delivery
            .current()
            .map_or(true, |previous| !self.values_equal(previous, &value));

        let actor_type = Arc::clone(&self.actor_type);
        if let Some(handle) = self
            .delivery
            .observe(value.clone(), |a, b| actor_type.values_equal(a, b))
        {
            host.timers.cancel(handle);
            debug!(actor = %self, "Value confirmed, cancelled re-sending timer");
        }

        if changed {
            info!(actor = %self, value = %value, "Received value");
        }
        Some(Observation { value, changed })
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.settings.friendly_name {
            Some(name) => write!(f, "A:{name}"),
            None => write!(f, "A:{}", self.entity_id),
        }
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("entity_id", &self.entity_id)
            .field("actor_type", &self.actor_type.name())
            .field("delivery", &self.delivery)
            .field("initialized", &self.initialized)
            .finish()
    }
}
