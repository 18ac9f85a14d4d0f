//! Statistical parameters published as entities
//!
//! A parameter aggregates one number per actor of its rooms into minimum,
//! weighted average and maximum, and writes them to the attributes of a
//! `schedy_stats.<app>_<name>` entity. Updates are debounced so that a burst
//! of actor changes results in a single write.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::Duration;
use parking_lot::Mutex;
use schedy_actor::ActorType;
use schedy_config::StatisticsDefinition;
use schedy_core::{slugify, EntityId, EntityIdError, Host, TimerHandle};
use schedy_room::Room;
use serde_json::Value;
use tracing::{debug, trace};

/// Domain of the entities statistics are published as
pub const STATS_DOMAIN: &str = "schedy_stats";

/// How long changes are collected before the parameter is recomputed
pub const UPDATE_DELAY_SECS: i64 = 3;

/// Minimum, weighted average and maximum of a set of samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinAvgMax {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl MinAvgMax {
    /// Aggregate samples; factors scale a sample, weights default to 1 and
    /// a weight of 0 leaves the sample out
    pub fn compute(
        samples: &[(EntityId, f64)],
        factors: &HashMap<EntityId, f64>,
        weights: &HashMap<EntityId, f64>,
    ) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut total_weight = 0.0;
        for (entity_id, sample) in samples {
            let weight = weights.get(entity_id).copied().unwrap_or(1.0);
            if weight == 0.0 {
                continue;
            }
            let sample = sample * factors.get(entity_id).copied().unwrap_or(1.0);
            min = min.min(sample);
            max = max.max(sample);
            sum += sample * weight;
            total_weight += weight;
        }

        if total_weight == 0.0 {
            return Self {
                min: 0.0,
                avg: 0.0,
                max: 0.0,
            };
        }
        Self {
            min: round2(min),
            avg: round2(sum / total_weight),
            max: round2(max),
        }
    }

    pub fn to_attributes(self) -> HashMap<String, Value> {
        HashMap::from([
            ("min".to_string(), Value::from(self.min)),
            ("avg".to_string(), Value::from(self.avg)),
            ("max".to_string(), Value::from(self.max)),
        ])
    }
}

#[derive(Default)]
struct PublishState {
    last: Option<MinAvgMax>,
    pending: Option<TimerHandle>,
}

pub struct StatisticalParameter {
    definition: StatisticsDefinition,
    entity_id: EntityId,
    actor_type: Arc<dyn ActorType>,
    rooms: Vec<Arc<Room>>,
    host: Host,
    state: Mutex<PublishState>,
}

impl StatisticalParameter {
    pub fn new(
        app_name: &str,
        definition: StatisticsDefinition,
        actor_type: Arc<dyn ActorType>,
        rooms: Vec<Arc<Room>>,
        host: Host,
    ) -> Result<Self, EntityIdError> {
        let entity_id = Self::entity_id(app_name, &definition.name)?;
        Ok(Self {
            definition,
            entity_id,
            actor_type,
            rooms,
            host,
            state: Mutex::new(PublishState::default()),
        })
    }

    /// Entity id a parameter of an app is published as
    pub fn entity_id(app_name: &str, name: &str) -> Result<EntityId, EntityIdError> {
        EntityId::new(STATS_DOMAIN, slugify(&format!("{app_name}_{name}")))
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn published_entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Whether a change of `entity_id` may change this parameter
    pub fn concerns(&self, entity_id: &EntityId) -> bool {
        self.rooms.iter().any(|room| room.has_actor(entity_id))
    }

    /// Recompute and publish after the update delay, unless already pending
    pub fn schedule_update(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.pending.is_some() {
            trace!(statistic = %self, "Update already pending");
            return;
        }
        let parameter: Weak<Self> = Arc::downgrade(self);
        state.pending = Some(self.host.timers.run_in(
            Duration::seconds(UPDATE_DELAY_SECS),
            Box::new(move || {
                if let Some(parameter) = parameter.upgrade() {
                    parameter.publish();
                }
            }),
        ));
    }

    /// One sample per initialized actor of the parameter's rooms
    pub fn samples(&self) -> Vec<(EntityId, f64)> {
        let mut samples = Vec::new();
        for room in &self.rooms {
            for (entity_id, value) in room.initialized_actor_values() {
                let state = self.host.states.get(&entity_id);
                let sample = self
                    .actor_type
                    .statistic_sample(self.definition.kind, value.as_ref(), state.as_ref())
                    .or(self.definition.off_value);
                match sample {
                    Some(sample) => samples.push((entity_id, sample)),
                    None => trace!(statistic = %self, actor = %entity_id, "Leaving actor out"),
                }
            }
        }
        samples
    }

    /// Recompute the parameter and write it if it changed
    pub fn publish(&self) {
        self.state.lock().pending = None;
        let summary = MinAvgMax::compute(
            &self.samples(),
            &self.definition.factors,
            &self.definition.weights,
        );

        {
            let mut state = self.state.lock();
            if state.last == Some(summary) {
                trace!(statistic = %self, "Unchanged, not publishing");
                return;
            }
            state.last = Some(summary);
        }
        debug!(
            statistic = %self,
            entity_id = %self.entity_id,
            min = summary.min,
            avg = summary.avg,
            max = summary.max,
            "Publishing statistical parameter"
        );
        self.host
            .states
            .set(&self.entity_id, "", summary.to_attributes());
    }

    /// The last published values, if any
    pub fn last_published(&self) -> Option<MinAvgMax> {
        self.state.lock().last
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.state.lock().pending.take() {
            self.host.timers.cancel(handle);
        }
    }
}

impl fmt::Display for StatisticalParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.definition.name, self.definition.kind)
    }
}
