//! Broadcast event bus
//!
//! Every event type gets its own broadcast channel, created on first
//! subscription. Subscribers of all events share one extra channel.

use dashmap::DashMap;
use schedy_core::{Context, Event, EventData, EventType};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Publishes events to any number of subscribers
pub struct EventBus {
    channels: DashMap<EventType, broadcast::Sender<Event<Value>>>,
    all: broadcast::Sender<Event<Value>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus whose channels buffer `capacity` events per slow receiver
    pub fn with_capacity(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        Self {
            channels: DashMap::new(),
            all,
            capacity,
        }
    }

    /// Receive events of one type
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<Event<Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing");
        self.channels
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Receive every event
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event<Value>> {
        self.all.subscribe()
    }

    /// Deliver an event to the subscribers of its type and of all events
    pub fn fire(&self, event: Event<Value>) {
        debug!(event_type = %event.event_type, "Firing event");
        if let Some(sender) = self.channels.get(&event.event_type) {
            // No receivers is fine
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event);
    }

    /// Serialize typed event data and fire it
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        match serde_json::to_value(&data) {
            Ok(payload) => self.fire(Event::new(T::event_type(), payload, context)),
            Err(e) => warn!(event_type = T::event_type(), error = %e, "Can't serialize event data"),
        }
    }

    /// Number of receivers listening to an event type, including catch-all ones
    pub fn receiver_count(&self, event_type: &str) -> usize {
        let typed = self
            .channels
            .get(&EventType::new(event_type))
            .map_or(0, |sender| sender.receiver_count());
        typed + self.all.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
