//! The room orchestrator

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{Duration, NaiveDateTime};
use parking_lot::ReentrantMutex;
use schedy_actor::{Actor, ActorType};
use schedy_core::{EntityId, EntityState, Host, TimerCallback, TimerHandle};
use schedy_expression::{Control, ExprEnv, ExprResult, Marker, ScheduleEvaluator, ScheduleOutcome};
use schedy_schedule::{Expression, Schedule};
use serde_json::Value;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{RoomError, RoomResult};
use crate::settings::{ReschedulingDelay, RoomSettings};
use crate::snapshot::{OverlaySnapshot, RoomSnapshot};
use crate::transaction::{Outbox, Transaction};

/// Seconds between attempts to initialize an actor without state
pub const ACTOR_INIT_RETRY_SECS: i64 = 10;

/// A value set from outside the schedule
#[derive(Debug, Clone, PartialEq)]
pub enum ManualValue {
    Value(Value),
    /// Expression source, evaluated in the room's environment
    Expression(String),
}

/// Values saved while a value marked `OVERLAY` is in effect
#[derive(Debug, Clone)]
pub(crate) struct Overlay {
    wanted: Value,
    scheduled: Option<Value>,
    rescheduling_time: Option<NaiveDateTime>,
    /// Also restore when the schedule stops yielding anything
    revert_on_no_result: bool,
}

/// A timer armed by the room
///
/// Its callback carries `token` and does nothing unless the slot it was
/// armed into still holds the same token when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArmedTimer {
    handle: TimerHandle,
    token: u64,
}

fn holds(slot: &Option<ArmedTimer>, token: u64) -> bool {
    slot.map_or(false, |timer| timer.token == token)
}

pub(crate) struct RoomState {
    actors: Vec<Actor>,
    wanted_value: Option<Value>,
    scheduled_value: Option<Value>,
    rescheduling_time: Option<NaiveDateTime>,
    rescheduling_timer: Option<ArmedTimer>,
    overlay: Option<Overlay>,
    overlay_timer: Option<ArmedTimer>,
    schedule_timer: Option<ArmedTimer>,
    init_timers: Vec<Option<ArmedTimer>>,
    last_token: u64,
    /// Nesting level of open transactions
    pub(crate) depth: u32,
    published: Option<RoomSnapshot>,
}

/// A set of actors driven by one schedule
pub struct Room {
    settings: RoomSettings,
    host: Host,
    /// Host handed to actors; its service calls go to the outbox
    actor_host: Host,
    outbox: Arc<Outbox>,
    actor_type: Arc<dyn ActorType>,
    schedule: Arc<Schedule>,
    evaluator: ScheduleEvaluator,
    persist_entity: Option<EntityId>,
    pub(crate) state: ReentrantMutex<RefCell<RoomState>>,
    this: Weak<Room>,
}

impl Room {
    pub fn new(
        settings: RoomSettings,
        host: Host,
        actor_type: Arc<dyn ActorType>,
        actors: Vec<Actor>,
        schedule: Arc<Schedule>,
        evaluator: ScheduleEvaluator,
    ) -> Arc<Self> {
        let outbox = Arc::new(Outbox::default());
        let actor_host = Host::new(
            Arc::clone(&host.states),
            outbox.clone(),
            Arc::clone(&host.timers),
        );
        let persist_entity = match RoomSnapshot::entity_id(&settings.app_name, &settings.name) {
            Ok(entity_id) => Some(entity_id),
            Err(e) => {
                warn!(room = %settings.name, error = %e, "Room can't be persisted");
                None
            }
        };
        let state = RoomState {
            init_timers: vec![None; actors.len()],
            actors,
            wanted_value: None,
            scheduled_value: None,
            rescheduling_time: None,
            rescheduling_timer: None,
            overlay: None,
            overlay_timer: None,
            schedule_timer: None,
            last_token: 0,
            depth: 0,
            published: None,
        };

        Arc::new_cyclic(|this| Self {
            settings,
            host,
            actor_host,
            outbox,
            actor_type,
            schedule,
            evaluator,
            persist_entity,
            state: ReentrantMutex::new(RefCell::new(state)),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub fn schedule(&self) -> &Arc<Schedule> {
        &self.schedule
    }

    pub fn actor_type(&self) -> &Arc<dyn ActorType> {
        &self.actor_type
    }

    /// Entity the room snapshot is published as
    pub fn persist_entity(&self) -> Option<&EntityId> {
        self.persist_entity.as_ref()
    }

    fn read<R>(&self, f: impl FnOnce(&RoomState) -> R) -> R {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&state)
    }

    pub fn actor_entity_ids(&self) -> Vec<EntityId> {
        self.read(|state| state.actors.iter().map(|a| a.entity_id().clone()).collect())
    }

    pub fn has_actor(&self, entity_id: &EntityId) -> bool {
        self.read(|state| state.actors.iter().any(|a| a.entity_id() == entity_id))
    }

    pub fn wanted_value(&self) -> Option<Value> {
        self.read(|state| state.wanted_value.clone())
    }

    pub fn scheduled_value(&self) -> Option<Value> {
        self.read(|state| state.scheduled_value.clone())
    }

    /// Deadline of the pending manual override
    pub fn rescheduling_time(&self) -> Option<NaiveDateTime> {
        self.read(|state| state.rescheduling_time)
    }

    pub fn is_rescheduling_pending(&self) -> bool {
        self.read(|state| state.rescheduling_timer.is_some())
    }

    /// The saved wanted value, scheduled value and deadline of an overlay
    pub fn overlay(&self) -> Option<(Value, Option<Value>, Option<NaiveDateTime>)> {
        self.read(|state| {
            state
                .overlay
                .as_ref()
                .map(|o| (o.wanted.clone(), o.scheduled.clone(), o.rescheduling_time))
        })
    }

    /// Values last observed at the actors, in actor order
    pub fn actor_values(&self) -> Vec<(EntityId, Option<Value>)> {
        self.read(|state| {
            state
                .actors
                .iter()
                .map(|a| (a.entity_id().clone(), a.current_value().cloned()))
                .collect()
        })
    }

    /// Current values of the actors that finished initializing
    pub fn initialized_actor_values(&self) -> Vec<(EntityId, Option<Value>)> {
        self.read(|state| {
            state
                .actors
                .iter()
                .filter(|a| a.is_initialized())
                .map(|a| (a.entity_id().clone(), a.current_value().cloned()))
                .collect()
        })
    }

    /// Whether the wanted value equals the scheduled value
    pub fn tracking_schedule(&self) -> bool {
        self.read(|state| self.is_tracking(state))
    }

    fn is_tracking(&self, state: &RoomState) -> bool {
        match (&state.scheduled_value, &state.wanted_value) {
            (Some(scheduled), Some(wanted)) => self.actor_type.values_equal(scheduled, wanted),
            _ => false,
        }
    }

    fn env(&self, now: NaiveDateTime) -> ExprEnv {
        ExprEnv::new(now)
            .with_room(self.settings.name.as_str())
            .with_app(self.settings.app_name.as_str())
    }

    /// Evaluate the schedule for `when` without acting on the result
    pub fn evaluate(&self, when: NaiveDateTime) -> Option<ScheduleOutcome> {
        self.evaluator.evaluate(&self.schedule, &self.env(when))
    }

    fn callback(&self, f: impl FnOnce(&Room) + Send + 'static) -> TimerCallback {
        let this = self.this.clone();
        Box::new(move || {
            if let Some(room) = this.upgrade() {
                f(&room);
            }
        })
    }

    /// Arm a room timer whose callback receives its token
    fn arm(
        &self,
        state: &mut RoomState,
        when: NaiveDateTime,
        f: impl FnOnce(&Room, u64) + Send + 'static,
    ) -> ArmedTimer {
        state.last_token += 1;
        let token = state.last_token;
        let handle = self.host.timers.run_at(when, self.callback(move |room| f(room, token)));
        ArmedTimer { handle, token }
    }

    fn disarm(&self, timer: Option<ArmedTimer>) -> bool {
        match timer {
            Some(timer) => {
                self.host.timers.cancel(timer.handle);
                true
            }
            None => false,
        }
    }

    /// Restore persisted state, initialize the actors and apply the schedule
    ///
    /// With `reset`, pending overrides and overlays aren't restored.
    #[instrument(skip(self), fields(room = %self))]
    pub fn initialize(&self, reset: bool) {
        let tx = Transaction::begin(self);
        info!(room = %self, "Initializing room");

        let expired = self.restore(&tx, reset);
        let count = tx.state().actors.len();
        for index in 0..count {
            self.initialize_actor(&tx, index);
        }
        self.arm_schedule_timer(&tx, self.host.now());
        self.apply_schedule_locked(&tx, reset || expired, false);
    }

    /// Read the persisted snapshot; returns whether its deadline already passed
    fn restore(&self, tx: &Transaction<'_>, reset: bool) -> bool {
        let Some(entity_id) = &self.persist_entity else {
            return false;
        };
        let Some(persisted) = self.host.states.get(entity_id) else {
            debug!(room = %self, "No persisted state");
            return false;
        };
        let snapshot = match RoomSnapshot::from_attributes(&persisted.attributes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(room = %self, error = %e, "Ignoring malformed persisted state");
                return false;
            }
        };

        let overlay_deadline = {
            let mut state = tx.state();
            state.published = Some(snapshot.clone());
            state.scheduled_value = snapshot.scheduled_value.as_deref().and_then(|t| self.decode(t));
            state.wanted_value = snapshot.wanted_value.as_deref().and_then(|t| self.decode(t));
            for actor in state.actors.iter_mut() {
                let wanted = snapshot
                    .actors
                    .get(&actor.entity_id().to_string())
                    .and_then(|t| self.decode(t));
                actor.restore_wanted_value(wanted);
            }
            debug!(
                room = %self,
                scheduled = ?state.scheduled_value,
                wanted = ?state.wanted_value,
                "Restored persisted values"
            );

            if reset {
                debug!(room = %self, "Not restoring overrides due to reset");
                return false;
            }
            state.overlay = snapshot.overlay.as_ref().and_then(|o| {
                Some(Overlay {
                    wanted: self.decode(&o.wanted_value)?,
                    scheduled: o.scheduled_value.as_deref().and_then(|t| self.decode(t)),
                    rescheduling_time: o.rescheduling_time,
                    revert_on_no_result: o.revert_on_no_result,
                })
            });
            state.overlay.as_ref().and_then(|o| o.rescheduling_time)
        };

        let now = self.host.now();
        if let Some(deadline) = overlay_deadline.filter(|d| *d > now) {
            self.arm_overlay_timer(tx, deadline);
        }
        match snapshot.rescheduling_time {
            Some(deadline) if deadline > now => {
                self.arm_rescheduling_timer(tx, Some(deadline));
                false
            }
            Some(deadline) => {
                info!(room = %self, deadline = %deadline, "Re-scheduling time passed while offline");
                true
            }
            None => false,
        }
    }

    fn decode(&self, text: &str) -> Option<Value> {
        match self.actor_type.deserialize_value(text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(room = %self, error = %e, "Ignoring persisted value");
                None
            }
        }
    }

    fn encode(&self, value: &Value) -> Option<String> {
        match self.actor_type.serialize_value(value) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(room = %self, error = %e, "Can't persist value");
                None
            }
        }
    }

    /// Initialize one actor, retrying later if its entity has no state yet
    fn initialize_actor(&self, tx: &Transaction<'_>, index: usize) -> bool {
        let wanted = {
            let mut state = tx.state();
            let pending = state.init_timers.get_mut(index).and_then(Option::take);
            self.disarm(pending);
            let Some(actor) = state.actors.get_mut(index) else {
                return false;
            };
            if actor.is_initialized() {
                return true;
            }
            if !actor.initialize(&self.actor_host) {
                warn!(
                    room = %self,
                    actor = %actor,
                    retry_in = ACTOR_INIT_RETRY_SECS,
                    "Actor couldn't be initialized, retrying later"
                );
                let retry_at = self.host.now() + Duration::seconds(ACTOR_INIT_RETRY_SECS);
                let timer = self.arm(&mut state, retry_at, move |room, token| {
                    room.retry_actor_initialization(index, token)
                });
                if let Some(slot) = state.init_timers.get_mut(index) {
                    *slot = Some(timer);
                }
                return false;
            }
            state.wanted_value.clone()
        };

        if let Some(wanted) = wanted {
            self.push_to_actor(tx, index, wanted, false);
        }
        true
    }

    fn retry_actor_initialization(&self, index: usize, token: u64) {
        let tx = Transaction::begin(self);
        {
            let mut state = tx.state();
            let Some(slot) = state.init_timers.get_mut(index) else {
                return;
            };
            if !holds(slot, token) {
                trace!(room = %self, index, "Ignoring stale initialization timer");
                return;
            }
            *slot = None;
        }
        self.initialize_actor(&tx, index);
    }

    /// Re-evaluate the schedule and push the result
    pub fn apply_schedule(&self, reset: bool, force_resend: bool) {
        let tx = Transaction::begin(self);
        self.apply_schedule_locked(&tx, reset, force_resend);
    }

    /// Re-evaluate, optionally dropping overrides and overlays first
    pub fn trigger_reevaluation(&self, reset: bool) {
        info!(room = %self, reset, "Re-evaluation requested");
        self.apply_schedule(reset, false);
    }

    #[instrument(skip(self, tx), fields(room = %self))]
    fn apply_schedule_locked(&self, tx: &Transaction<'_>, reset: bool, force_resend: bool) {
        let now = self.host.now();
        let Some(outcome) = self.evaluator.evaluate(&self.schedule, &self.env(now)) else {
            debug!(room = %self, "No suitable value found in schedule");
            let revert = tx
                .state()
                .overlay
                .as_ref()
                .map_or(false, |overlay| overlay.revert_on_no_result);
            if revert && !reset {
                self.reinstate_overlay(tx, now);
            }
            return;
        };
        let overlay_marked = outcome.markers.iter().any(Marker::is_overlay);
        let revert_on_no_result = outcome.has_marker(Marker::OverlayRevertOnNoResult);
        let value = outcome.value;

        let previous_scheduled = {
            let mut state = tx.state();
            let unchanged = state
                .scheduled_value
                .as_ref()
                .map_or(false, |scheduled| self.actor_type.values_equal(scheduled, &value));
            if unchanged && !reset && !force_resend {
                trace!(room = %self, value = %value, "Result didn't change, not setting it again");
                return;
            }
            state.scheduled_value.replace(value.clone())
        };

        if reset {
            self.cancel_rescheduling_timer_locked(tx, true);
            self.clear_overlay(tx);
        } else if overlay_marked {
            self.save_overlay(tx, &value, previous_scheduled, revert_on_no_result);
        } else if tx.state().overlay.is_some() {
            self.restore_overlay(tx, &value, now);
            return;
        } else if tx.state().rescheduling_timer.is_some() {
            debug!(room = %self, "Not applying the schedule while a manual override is pending");
            return;
        }

        self.set_value_locked(tx, value, force_resend);
    }

    fn save_overlay(
        &self,
        tx: &Transaction<'_>,
        value: &Value,
        previous_scheduled: Option<Value>,
        revert_on_no_result: bool,
    ) {
        let mut state = tx.state();
        if state.overlay.is_some() {
            return;
        }
        let Some(wanted) = state.wanted_value.clone() else {
            return;
        };
        let rescheduling = state.rescheduling_timer.is_some();
        if !rescheduling && self.actor_type.values_equal(&wanted, value) {
            return;
        }

        let pending = state.rescheduling_timer.take();
        self.disarm(pending);
        let rescheduling_time = state.rescheduling_time.take();
        info!(
            room = %self,
            wanted = %wanted,
            scheduled = ?previous_scheduled,
            deadline = ?rescheduling_time,
            revert_on_no_result,
            "Saving overlaid values"
        );
        state.overlay = Some(Overlay {
            wanted,
            scheduled: previous_scheduled,
            rescheduling_time,
            revert_on_no_result,
        });
    }

    /// Restore a saved overlay once its deadline passed or the schedule returned
    fn restore_overlay(&self, tx: &Transaction<'_>, value: &Value, now: NaiveDateTime) {
        let Some(overlay) = tx.state().overlay.clone() else {
            return;
        };
        let deadline_passed = overlay.rescheduling_time.map_or(true, |deadline| deadline <= now);
        let schedule_returned = overlay
            .scheduled
            .as_ref()
            .map_or(false, |scheduled| self.actor_type.values_equal(scheduled, value));

        if !deadline_passed && !schedule_returned {
            if let Some(deadline) = overlay.rescheduling_time {
                debug!(room = %self, deadline = %deadline, "Keeping the overlay until its deadline");
                self.arm_overlay_timer(tx, deadline);
            }
            return;
        }
        self.reinstate_overlay(tx, now);
    }

    /// Drop the overlay and bring back the value and deadline it saved
    fn reinstate_overlay(&self, tx: &Transaction<'_>, now: NaiveDateTime) {
        let Some(overlay) = tx.state().overlay.clone() else {
            return;
        };
        self.clear_overlay(tx);
        info!(room = %self, value = %overlay.wanted, "Restoring overlaid value");
        self.set_value_locked(tx, overlay.wanted, false);
        if let Some(deadline) = overlay.rescheduling_time.filter(|deadline| *deadline > now) {
            self.arm_rescheduling_timer(tx, Some(deadline));
        }
    }

    fn clear_overlay(&self, tx: &Transaction<'_>) {
        let mut state = tx.state();
        let pending = state.overlay_timer.take();
        self.disarm(pending);
        if state.overlay.take().is_some() {
            debug!(room = %self, "Dropped overlay");
        }
    }

    fn arm_overlay_timer(&self, tx: &Transaction<'_>, deadline: NaiveDateTime) {
        let mut state = tx.state();
        if state.overlay_timer.is_some() {
            return;
        }
        let timer = self.arm(&mut state, deadline, |room, token| room.overlay_timer_fired(token));
        state.overlay_timer = Some(timer);
    }

    fn overlay_timer_fired(&self, token: u64) {
        let tx = Transaction::begin(self);
        {
            let mut state = tx.state();
            if !holds(&state.overlay_timer, token) {
                trace!(room = %self, "Ignoring stale overlay timer");
                return;
            }
            state.overlay_timer = None;
        }
        debug!(room = %self, "Overlay deadline reached");
        self.apply_schedule_locked(&tx, false, true);
    }

    /// Make `value` the wanted value and push it to every initialized actor
    ///
    /// Returns whether any actor started sending.
    pub fn set_value(&self, value: Value, force_resend: bool) -> bool {
        let tx = Transaction::begin(self);
        self.set_value_locked(&tx, value, force_resend)
    }

    fn set_value_locked(&self, tx: &Transaction<'_>, value: Value, force_resend: bool) -> bool {
        let count = {
            let mut state = tx.state();
            state.wanted_value = Some(value.clone());
            state.actors.len()
        };
        debug!(room = %self, value = %value, force_resend, "Setting value");

        let mut sent = false;
        for index in 0..count {
            sent |= self.push_to_actor(tx, index, value.clone(), force_resend);
        }
        if sent {
            info!(room = %self, value = %value, "Value set");
        }
        sent
    }

    fn push_to_actor(&self, tx: &Transaction<'_>, index: usize, value: Value, force_resend: bool) -> bool {
        let resend = |generation: u64, left_tries: u32| -> TimerCallback {
            self.callback(move |room| room.resend(index, generation, left_tries))
        };
        let mut state = tx.state();
        let Some(actor) = state.actors.get_mut(index) else {
            return false;
        };
        if !actor.is_initialized() {
            return false;
        }
        actor.set_value(value, force_resend, &self.actor_host, &resend).0
    }

    fn resend(&self, index: usize, generation: u64, left_tries: u32) {
        let tx = Transaction::begin(self);
        let resend = |generation: u64, left_tries: u32| -> TimerCallback {
            self.callback(move |room| room.resend(index, generation, left_tries))
        };
        let mut state = tx.state();
        if let Some(actor) = state.actors.get_mut(index) {
            actor.resend(generation, left_tries, &self.actor_host, &resend);
        }
    }

    /// Route a new state of an actor's entity; returns whether an actor owns it
    pub fn notify_state(&self, entity_id: &EntityId, new_state: &EntityState) -> bool {
        let tx = Transaction::begin(self);
        let (index, initialized) = {
            let state = tx.state();
            let Some(index) = state.actors.iter().position(|a| a.entity_id() == entity_id) else {
                return false;
            };
            (index, state.actors[index].is_initialized())
        };
        if !initialized {
            self.initialize_actor(&tx, index);
            return true;
        }

        let observation = tx
            .state()
            .actors
            .get_mut(index)
            .and_then(|actor| actor.notify_state(new_state, &self.actor_host));
        if let Some(observation) = observation.filter(|o| o.changed) {
            self.notify_value_changed_locked(&tx, index, observation.value);
        }
        true
    }

    /// React to a value observed at an actor that differs from the last one
    pub fn notify_value_changed(&self, index: usize, value: Value) {
        let tx = Transaction::begin(self);
        self.notify_value_changed_locked(&tx, index, value);
    }

    fn notify_value_changed_locked(&self, tx: &Transaction<'_>, index: usize, value: Value) {
        let (actor_name, actor_wanted) = {
            let state = tx.state();
            let Some(actor) = state.actors.get(index) else {
                return;
            };
            if actor.is_sending() || actor.gave_up() {
                trace!(room = %self, actor = %actor, "Ignoring change while delivering");
                return;
            }
            (actor.to_string(), actor.wanted_value().cloned())
        };

        if actor_wanted
            .as_ref()
            .map_or(false, |wanted| self.actor_type.values_equal(wanted, &value))
        {
            let settled = {
                let state = tx.state();
                let all_synced = state
                    .actors
                    .iter()
                    .filter(|a| a.is_initialized())
                    .all(Actor::is_synced);
                all_synced && self.is_tracking(&state)
            };
            if settled {
                self.cancel_rescheduling_timer_locked(tx, true);
            }
            return;
        }

        if !self.settings.allow_manual_changes {
            let wanted = tx.state().wanted_value.clone();
            match wanted {
                Some(wanted) => {
                    info!(room = %self, actor = %actor_name, value = %value, wanted = %wanted, "Reverting manual change");
                    self.push_to_actor(tx, index, wanted, true);
                }
                None => debug!(room = %self, actor = %actor_name, "No wanted value to revert to"),
            }
            return;
        }

        info!(room = %self, actor = %actor_name, value = %value, "Value changed manually");
        if self.settings.replicate_changes {
            self.set_value_locked(tx, value, false);
            if self.is_tracking(&tx.state()) {
                self.cancel_rescheduling_timer_locked(tx, true);
                return;
            }
        }
        if self.settings.default_delay().is_some() {
            if let Err(e) = self.start_rescheduling_timer_locked(tx, None) {
                warn!(room = %self, error = %e, "Can't start re-scheduling timer");
            }
        }
    }

    /// Set a value from outside the schedule
    ///
    /// The schedule takes over again after `delay`, the room's default delay
    /// if None; a zero delay or no delay at all leaves the value in place
    /// until the schedule's result changes.
    #[instrument(skip(self, manual), fields(room = %self))]
    pub fn set_value_manually(
        &self,
        manual: ManualValue,
        force_resend: bool,
        delay: Option<ReschedulingDelay>,
    ) -> RoomResult<Value> {
        let tx = Transaction::begin(self);
        let deadline = match delay.or_else(|| self.settings.default_delay()) {
            Some(delay) => delay.deadline(self.host.now())?,
            None => None,
        };
        let value = match manual {
            ManualValue::Value(value) => value,
            ManualValue::Expression(source) => self.evaluate_expression(&source)?,
        };
        let value = self
            .actor_type
            .validate_value(value)
            .map_err(|e| RoomError::InvalidValue {
                value: e.value,
                reason: e.reason,
            })?;

        info!(room = %self, value = %value, delay = ?delay, "Setting value manually");
        self.set_value_locked(&tx, value.clone(), force_resend);
        self.arm_rescheduling_timer(&tx, deadline);
        Ok(value)
    }

    fn evaluate_expression(&self, source: &str) -> RoomResult<Value> {
        let env = self.env(self.host.now());
        let result = self
            .evaluator
            .executor()
            .execute(&Expression::new(source), &env)
            .map_err(|e| RoomError::Expression {
                expression: source.to_string(),
                reason: e.to_string(),
            })?;
        debug!(room = %self, expression = source, result = ?result, "Evaluated expression");
        self.resolve_manual_result(result, &env)
            .ok_or_else(|| RoomError::NoValue(source.to_string()))
    }

    fn resolve_manual_result(&self, result: ExprResult, env: &ExprEnv) -> Option<Value> {
        match result {
            ExprResult::Value(value) => Some(value),
            ExprResult::Control(Control::IncludeSchedule(schedule)) => {
                self.evaluator.evaluate(&schedule, env).map(|outcome| outcome.value)
            }
            ExprResult::Control(Control::Mark(inner, _)) => self.resolve_manual_result(*inner, env),
            _ => None,
        }
    }

    /// Start or replace the re-scheduling timer
    ///
    /// Without `delay` the room's default delay applies. An out-of-range
    /// delay leaves the running timer in place.
    pub fn start_rescheduling_timer(&self, delay: Option<ReschedulingDelay>) -> RoomResult<()> {
        let tx = Transaction::begin(self);
        self.start_rescheduling_timer_locked(&tx, delay)
    }

    fn start_rescheduling_timer_locked(
        &self,
        tx: &Transaction<'_>,
        delay: Option<ReschedulingDelay>,
    ) -> RoomResult<()> {
        let deadline = match delay.or_else(|| self.settings.default_delay()) {
            Some(delay) => delay.deadline(self.host.now())?,
            None => None,
        };
        self.arm_rescheduling_timer(tx, deadline);
        Ok(())
    }

    /// Replace the re-scheduling timer by one firing at `deadline`, if any
    fn arm_rescheduling_timer(&self, tx: &Transaction<'_>, deadline: Option<NaiveDateTime>) {
        self.cancel_rescheduling_timer_locked(tx, true);
        let Some(deadline) = deadline else {
            return;
        };
        let mut state = tx.state();
        let timer = self.arm(&mut state, deadline, |room, token| {
            room.rescheduling_timer_fired(token)
        });
        state.rescheduling_time = Some(deadline);
        state.rescheduling_timer = Some(timer);
        info!(room = %self, deadline = %deadline, "Re-applying the schedule not before deadline");
    }

    /// Cancel the re-scheduling timer; returns whether one was running
    pub fn cancel_rescheduling_timer(&self) -> bool {
        let tx = Transaction::begin(self);
        self.cancel_rescheduling_timer_locked(&tx, true)
    }

    fn cancel_rescheduling_timer_locked(&self, tx: &Transaction<'_>, reset_time: bool) -> bool {
        let mut state = tx.state();
        let pending = state.rescheduling_timer.take();
        if !self.disarm(pending) {
            return false;
        }
        if reset_time {
            state.rescheduling_time = None;
        }
        debug!(room = %self, "Cancelled re-scheduling timer");
        true
    }

    fn rescheduling_timer_fired(&self, token: u64) {
        let tx = Transaction::begin(self);
        {
            let mut state = tx.state();
            if !holds(&state.rescheduling_timer, token) {
                trace!(room = %self, "Ignoring stale re-scheduling timer");
                return;
            }
            state.rescheduling_timer = None;
            state.rescheduling_time = None;
        }
        debug!(room = %self, "Re-scheduling timer fired");
        self.apply_schedule_locked(&tx, true, false);
    }

    fn arm_schedule_timer(&self, tx: &Transaction<'_>, after: NaiveDateTime) {
        let mut state = tx.state();
        let pending = state.schedule_timer.take();
        self.disarm(pending);
        let Some(when) = self.schedule.next_scheduling_datetime(after) else {
            debug!(room = %self, "Schedule has no scheduling times");
            return;
        };
        trace!(room = %self, at = %when, "Arming scheduling timer");
        let timer = self.arm(&mut state, when, move |room, token| {
            room.schedule_timer_fired(when, token)
        });
        state.schedule_timer = Some(timer);
    }

    fn schedule_timer_fired(&self, when: NaiveDateTime, token: u64) {
        let tx = Transaction::begin(self);
        {
            let mut state = tx.state();
            if !holds(&state.schedule_timer, token) {
                trace!(room = %self, at = %when, "Ignoring stale scheduling timer");
                return;
            }
            state.schedule_timer = None;
        }
        debug!(room = %self, at = %when, "Scheduling timer fired");
        self.apply_schedule_locked(&tx, false, false);
        self.arm_schedule_timer(&tx, when + Duration::seconds(1));
    }

    /// Cancel every timer of the room and its actors
    pub fn shutdown(&self) {
        let tx = Transaction::begin(self);
        let mut state = tx.state();
        let timers: Vec<ArmedTimer> = [
            state.rescheduling_timer.take(),
            state.overlay_timer.take(),
            state.schedule_timer.take(),
        ]
        .into_iter()
        .chain(state.init_timers.iter_mut().map(Option::take))
        .flatten()
        .collect();
        for timer in timers {
            self.disarm(Some(timer));
        }
        for actor in state.actors.iter_mut() {
            actor.cancel_resending(&self.actor_host);
        }
        debug!(room = %self, "Room shut down");
    }

    pub(crate) fn flush_outbox(&self) {
        while let Some(call) = self.outbox.pop() {
            self.host.services.call(call);
        }
    }

    /// The snapshot to publish, if it changed since the last publication
    pub(crate) fn take_publication(&self, state: &mut RoomState) -> Option<RoomSnapshot> {
        self.persist_entity.as_ref()?;
        let snapshot = self.snapshot_of(state);
        if state.published.as_ref() == Some(&snapshot) {
            return None;
        }
        state.published = Some(snapshot.clone());
        Some(snapshot)
    }

    fn snapshot_of(&self, state: &RoomState) -> RoomSnapshot {
        let overlay = state.overlay.as_ref().and_then(|o| {
            Some(OverlaySnapshot {
                wanted_value: self.encode(&o.wanted)?,
                scheduled_value: o.scheduled.as_ref().and_then(|v| self.encode(v)),
                rescheduling_time: o.rescheduling_time,
                revert_on_no_result: o.revert_on_no_result,
            })
        });
        RoomSnapshot {
            scheduled_value: state.scheduled_value.as_ref().and_then(|v| self.encode(v)),
            wanted_value: state.wanted_value.as_ref().and_then(|v| self.encode(v)),
            overlay,
            rescheduling_time: state.rescheduling_time,
            actors: state
                .actors
                .iter()
                .filter_map(|actor| {
                    let wanted = self.encode(actor.wanted_value()?)?;
                    Some((actor.entity_id().to_string(), wanted))
                })
                .collect(),
        }
    }

    pub(crate) fn publish(&self, snapshot: &RoomSnapshot) {
        let Some(entity_id) = &self.persist_entity else {
            return;
        };
        let mut attributes = snapshot.to_attributes();
        attributes.insert(
            "friendly_name".to_string(),
            Value::from(format!("Schedy {}", self.settings.display_name())),
        );
        trace!(room = %self, entity_id = %entity_id, state = snapshot.state(), "Publishing room state");
        self.host.states.set(entity_id, snapshot.state(), attributes);
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R:{}", self.settings.display_name())
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.settings.name)
            .field("app_name", &self.settings.app_name)
            .field("actor_type", &self.actor_type.name())
            .finish_non_exhaustive()
    }
}
