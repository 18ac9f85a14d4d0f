//! Service registry recording every call

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use schedy_core::{ServiceCall, ServiceCaller};
use tracing::{debug, instrument, warn};

use crate::state_store::MemoryStateStore;

/// Handler invoked synchronously for calls of one service
pub type ServiceHandler = Arc<dyn Fn(&ServiceCall) + Send + Sync>;

/// Records service calls and dispatches them to registered handlers
///
/// Calls of services without a handler are recorded and otherwise dropped.
#[derive(Default)]
pub struct ServiceRegistry {
    handlers: DashMap<String, ServiceHandler>,
    calls: Mutex<Vec<ServiceCall>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler of `domain.service`, replacing an existing one
    pub fn register(
        &self,
        domain: &str,
        service: &str,
        handler: impl Fn(&ServiceCall) + Send + Sync + 'static,
    ) {
        let key = format!("{domain}.{service}");
        debug!(service = %key, "Registering service");
        self.handlers.insert(key, Arc::new(handler));
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.handlers.contains_key(&format!("{domain}.{service}"))
    }

    /// All calls made so far, oldest first
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    /// Calls of one `domain.service`
    pub fn calls_of(&self, service_id: &str) -> Vec<ServiceCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.service_id() == service_id)
            .cloned()
            .collect()
    }

    /// Return and forget the recorded calls
    pub fn take_calls(&self) -> Vec<ServiceCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Register handlers making climate and on/off entities follow their calls
    pub fn emulate_devices(&self, states: Arc<MemoryStateStore>) {
        let store = Arc::clone(&states);
        self.register("climate", "set_temperature", move |call| {
            let (Some(entity_id), Some(temperature)) =
                (call.target_entity(), call.service_data.get("temperature"))
            else {
                return;
            };
            let attributes = [("temperature".to_string(), temperature.clone())];
            if store.update_attributes(&entity_id, attributes.clone()).is_none() {
                store.set_state(&entity_id, "heat", HashMap::from(attributes));
            }
        });

        let store = Arc::clone(&states);
        self.register("climate", "set_hvac_mode", move |call| {
            let (Some(entity_id), Some(mode)) = (call.target_entity(), call.get::<String>("hvac_mode"))
            else {
                return;
            };
            let attributes = store
                .get_attributes(&entity_id)
                .unwrap_or_default();
            store.set_state(&entity_id, &mode, attributes);
        });

        for domain in ["homeassistant", "switch", "light"] {
            for (service, state) in [("turn_on", "on"), ("turn_off", "off")] {
                let store = Arc::clone(&states);
                self.register(domain, service, move |call| {
                    if let Some(entity_id) = call.target_entity() {
                        let attributes = store.get_attributes(&entity_id).unwrap_or_default();
                        store.set_state(&entity_id, state, attributes);
                    }
                });
            }
        }
    }
}

impl ServiceCaller for ServiceRegistry {
    #[instrument(skip(self, call), fields(service = %call.service_id()))]
    fn call(&self, call: ServiceCall) {
        self.calls.lock().push(call.clone());
        let handler = self
            .handlers
            .get(&call.service_id())
            .map(|entry| Arc::clone(entry.value()));
        match handler {
            Some(handler) => handler(&call),
            None => warn!(data = %call.service_data, "No handler for service, call recorded only"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use schedy_core::{EntityId, StateStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_calls_are_recorded() {
        let registry = ServiceRegistry::new();
        registry.call(ServiceCall::new("climate", "set_temperature", json!({"temperature": 20})));
        registry.call(ServiceCall::new("switch", "turn_on", json!({})));

        assert_eq!(registry.calls().len(), 2);
        assert_eq!(registry.calls_of("switch.turn_on").len(), 1);
        assert_eq!(registry.take_calls().len(), 2);
        assert!(registry.calls().is_empty());
    }

    #[test]
    fn test_handler_dispatch() {
        let registry = ServiceRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        registry.register("script", "run", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(registry.has_service("script", "run"));

        registry.call(ServiceCall::new("script", "run", json!({})));
        registry.call(ServiceCall::new("script", "stop", json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_emulation() {
        let states = Arc::new(MemoryStateStore::new(Arc::new(EventBus::new())));
        let registry = ServiceRegistry::new();
        registry.emulate_devices(Arc::clone(&states));

        let thermostat: EntityId = "climate.bath".parse().unwrap();
        registry.call(ServiceCall::new(
            "climate",
            "set_temperature",
            json!({"entity_id": "climate.bath", "temperature": 21.5}),
        ));
        registry.call(ServiceCall::new(
            "climate",
            "set_hvac_mode",
            json!({"entity_id": "climate.bath", "hvac_mode": "off"}),
        ));
        let state = states.get(&thermostat).unwrap();
        assert_eq!(state.state, "off");
        assert_eq!(state.attribute::<f64>("temperature"), Some(21.5));

        registry.call(ServiceCall::new(
            "homeassistant",
            "turn_on",
            json!({"entity_id": "switch.pump"}),
        ));
        assert_eq!(states.get(&"switch.pump".parse().unwrap()).unwrap().state, "on");
    }
}
