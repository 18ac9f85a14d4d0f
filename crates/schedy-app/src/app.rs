//! A Schedy app: the rooms of one configuration entry and their events

use std::sync::Arc;

use chrono::NaiveDateTime;
use schedy_actor::{Actor, ActorType, ActorTypeRules};
use schedy_config::{for_each_expression, AppDefinition};
use schedy_core::events::{ReevaluateData, ReevaluateMode, SetValueData, StateChangedData};
use schedy_core::{Event, Host};
use schedy_expression::{ExpressionEngine, ExpressionExecutor, ScheduleEvaluator, ScheduleOutcome};
use schedy_room::{ManualValue, ReschedulingDelay, Room};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{AppError, AppResult};
use crate::stats::StatisticalParameter;
use crate::watch::WatchTable;

pub struct SchedyApp {
    name: String,
    host: Host,
    actor_type: Arc<dyn ActorType>,
    reset_at_startup: bool,
    expressions_from_events: bool,
    rooms: Vec<Arc<Room>>,
    watches: WatchTable,
    statistics: Vec<Arc<StatisticalParameter>>,
}

impl SchedyApp {
    /// Create the rooms of an app definition on `host`
    ///
    /// Every expression of every schedule is syntax-checked up front.
    pub fn new(definition: &AppDefinition, host: Host) -> AppResult<Self> {
        let actor_type = Arc::clone(&definition.actor_type);

        let rules = Arc::new(ActorTypeRules::new(Arc::clone(&actor_type)));
        let mut engine =
            ExpressionEngine::new(Arc::clone(&host.states), definition.snippets.clone())
                .with_value_rules(rules.clone());
        for (name, value) in actor_type.expression_globals() {
            engine = engine.with_global(name, value);
        }
        check_expressions(&engine, definition)?;
        let executor: Arc<dyn ExpressionExecutor> = Arc::new(engine);

        let mut rooms = Vec::with_capacity(definition.rooms.len());
        let mut watches = WatchTable::new();
        for (index, room) in definition.rooms.iter().enumerate() {
            let actors = room
                .actors
                .iter()
                .map(|actor| {
                    let entity_id = actor.entity_id.clone();
                    Actor::from_config(entity_id, Arc::clone(&actor_type), &actor.config).map_err(
                        |e| AppError::Actor {
                            room: room.settings.name.clone(),
                            entity_id: actor.entity_id.to_string(),
                            reason: e.to_string(),
                        },
                    )
                })
                .collect::<AppResult<Vec<_>>>()?;
            let evaluator = ScheduleEvaluator::new(Arc::clone(&executor), rules.clone());
            rooms.push(Room::new(
                room.settings.clone(),
                host.clone(),
                Arc::clone(&actor_type),
                actors,
                Arc::clone(&room.schedule),
                evaluator,
            ));
            watches.add_room(index, &room.watched_entities);
        }

        let statistics = definition
            .statistics
            .iter()
            .map(|stats| {
                let stats_rooms = rooms
                    .iter()
                    .filter(|room| stats.rooms.iter().any(|name| name == room.name()))
                    .cloned()
                    .collect();
                StatisticalParameter::new(
                    &definition.name,
                    stats.clone(),
                    Arc::clone(&actor_type),
                    stats_rooms,
                    host.clone(),
                )
                .map(Arc::new)
                .map_err(|e| AppError::Statistics {
                    name: stats.name.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        debug!(
            app = %definition.name,
            rooms = rooms.len(),
            watches = watches.len(),
            statistics = statistics.len(),
            "Created app"
        );
        Ok(Self {
            name: definition.name.clone(),
            host,
            actor_type,
            reset_at_startup: definition.reset_at_startup,
            expressions_from_events: definition.expressions_from_events,
            rooms,
            watches,
            statistics,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actor_type(&self) -> &Arc<dyn ActorType> {
        &self.actor_type
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn rooms(&self) -> &[Arc<Room>] {
        &self.rooms
    }

    pub fn room(&self, name: &str) -> Option<&Arc<Room>> {
        self.rooms.iter().find(|room| room.name() == name)
    }

    pub fn statistics(&self) -> &[Arc<StatisticalParameter>] {
        &self.statistics
    }

    /// Initialize every room, resetting them if configured to
    pub fn initialize(&self) {
        info!(app = %self.name, actor_type = self.actor_type.name(), "Initializing app");
        for room in &self.rooms {
            room.initialize(self.reset_at_startup);
        }
        for parameter in &self.statistics {
            parameter.schedule_update();
        }
    }

    /// Cancel every timer of every room and statistical parameter
    pub fn shutdown(&self) {
        for room in &self.rooms {
            room.shutdown();
        }
        for parameter in &self.statistics {
            parameter.shutdown();
        }
        info!(app = %self.name, "App shut down");
    }

    /// Evaluate every room's schedule at `when` without acting on the result
    pub fn evaluate(&self, when: NaiveDateTime) -> Vec<(Arc<Room>, Option<ScheduleOutcome>)> {
        self.rooms
            .iter()
            .map(|room| (Arc::clone(room), room.evaluate(when)))
            .collect()
    }

    /// Dispatch one event from the bus; returns whether the app acted on it
    pub fn handle_event(&self, event: &Event<Value>) -> bool {
        if let Some(data) = event.parse::<StateChangedData>() {
            return self.on_state_changed(&data);
        }
        if let Some(data) = event.parse::<ReevaluateData>() {
            return self.on_reevaluate(&data);
        }
        if let Some(data) = event.parse::<SetValueData>() {
            return match self.on_set_value(&data) {
                Ok(acted) => acted,
                Err(e) => {
                    warn!(app = %self.name, error = %e, data = ?data, "Ignoring event");
                    false
                }
            };
        }
        false
    }

    /// Process events until the bus closes or `shutdown` fires
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<Event<Value>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(app = %self.name, "App running");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        self.handle_event(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(app = %self.name, skipped = n, "App lagged behind the event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(app = %self.name, "Event bus closed");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    info!(app = %self.name, "Received shutdown signal");
                    break;
                }
            }
        }
        self.shutdown();
    }

    fn accepts(&self, app_name: Option<&str>, event: &str) -> bool {
        match app_name {
            Some(name) if name != self.name => {
                debug!(app = %self.name, requested = name, event, "Event is for another app");
                false
            }
            _ => true,
        }
    }

    fn target_rooms(&self, room: Option<&str>, event: &str) -> Vec<&Arc<Room>> {
        match room {
            None => self.rooms.iter().collect(),
            Some(name) => match self.room(name) {
                Some(room) => vec![room],
                None => {
                    warn!(app = %self.name, room = name, event, "Ignoring event for unknown room");
                    Vec::new()
                }
            },
        }
    }

    #[instrument(skip(self, data), fields(app = %self.name))]
    fn on_reevaluate(&self, data: &ReevaluateData) -> bool {
        if !self.accepts(data.app_name.as_deref(), "schedy_reevaluate") {
            return false;
        }
        let reset = data.mode == ReevaluateMode::Reset;
        let rooms = self.target_rooms(data.room.as_deref(), "schedy_reevaluate");
        info!(rooms = rooms.len(), reset, "Re-evaluation requested");
        for room in &rooms {
            room.trigger_reevaluation(reset);
        }
        !rooms.is_empty()
    }

    #[instrument(skip(self, data), fields(app = %self.name))]
    fn on_set_value(&self, data: &SetValueData) -> AppResult<bool> {
        if !self.accepts(data.app_name.as_deref(), "schedy_set_value") {
            return Ok(false);
        }
        let invalid = |reason: &str| AppError::InvalidEvent {
            event: "schedy_set_value",
            reason: reason.to_string(),
        };

        let delay = match data.rescheduling_delay {
            Some(minutes) if minutes < 0.0 || !minutes.is_finite() => {
                return Err(invalid("rescheduling_delay must be a non-negative number"))
            }
            Some(minutes) => {
                let delay = ReschedulingDelay::Minutes(minutes);
                if let Err(e) = delay.deadline(self.host.now()) {
                    warn!(error = %e, "Rejecting re-scheduling delay");
                    return Err(invalid("rescheduling_delay is out of range"));
                }
                Some(delay)
            }
            None => None,
        };
        let manual = match (&data.expression, &data.value) {
            (Some(_), Some(_)) => return Err(invalid("expression and value are exclusive")),
            (Some(expression), None) => {
                if !self.expressions_from_events {
                    error!("Received an expression, but expressions_from_events is disabled");
                    return Err(invalid("expressions from events are disabled"));
                }
                ManualValue::Expression(expression.clone())
            }
            (None, Some(Value::Null)) | (None, None) => {
                return Err(invalid("either expression or value is required"))
            }
            (None, Some(value)) => ManualValue::Value(value.clone()),
        };

        let rooms = self.target_rooms(data.room.as_deref(), "schedy_set_value");
        for room in &rooms {
            match room.set_value_manually(manual.clone(), data.force_resend, delay) {
                Ok(value) => debug!(room = %room, value = %value, "Value set from event"),
                Err(e) => warn!(room = %room, error = %e, "Can't set value"),
            }
        }
        Ok(!rooms.is_empty())
    }

    fn on_state_changed(&self, data: &StateChangedData) -> bool {
        let mut acted = false;
        if let Some(new_state) = &data.new_state {
            for room in &self.rooms {
                if room.notify_state(&data.entity_id, new_state) {
                    trace!(room = %room, entity_id = %data.entity_id, "Routed state to actor");
                    acted = true;
                }
            }
        }
        for parameter in &self.statistics {
            if parameter.concerns(&data.entity_id) {
                parameter.schedule_update();
            }
        }

        let affected = self.watches.affected_rooms(
            &data.entity_id,
            data.old_state.as_ref(),
            data.new_state.as_ref(),
        );
        for (index, reset) in affected {
            if let Some(room) = self.rooms.get(index) {
                info!(
                    room = %room,
                    entity_id = %data.entity_id,
                    reset,
                    "Watched entity changed, re-evaluating"
                );
                room.trigger_reevaluation(reset);
                acted = true;
            }
        }
        acted
    }
}

fn check_expressions(engine: &ExpressionEngine, definition: &AppDefinition) -> AppResult<()> {
    let schedules = definition
        .rooms
        .iter()
        .map(|room| (format!("room {}", room.settings.name), &room.schedule))
        .chain(
            definition
                .snippets
                .iter()
                .map(|(name, schedule)| (format!("snippet {name}"), schedule)),
        );

    for (location, schedule) in schedules {
        let mut failure = None;
        for_each_expression(schedule, &mut |_, source| {
            if failure.is_none() {
                if let Err(e) = engine.check_syntax(source) {
                    failure = Some(AppError::Expression {
                        location: format!("{location}: {source:?}"),
                        reason: e.to_string(),
                    });
                }
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
    }
    Ok(())
}
