//! Room orchestration against the simulated host

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use schedy_actor::{actor_type_by_name, Actor, ActorTypeRules};
use schedy_core::events::{StateChangedData, STATE_CHANGED};
use schedy_core::{EntityId, Event, Host, StateStore, TimerCallback, TimerHandle, TimerService};
use schedy_expression::{ExpressionEngine, ScheduleEvaluator};
use schedy_host::{ManualTimers, SimulatedHost};
use schedy_room::{ManualValue, ReschedulingDelay, Room, RoomError, RoomSettings};
use schedy_schedule::{Rule, Schedule};
use serde_json::{json, Value};
use tokio::sync::broadcast;

const WINDOW_RULE: &str = "Mark(OFF, 'OVERLAY') if is_on('binary_sensor.window') else Skip()";

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 14)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn id(entity_id: &str) -> EntityId {
    entity_id.parse().unwrap()
}

struct Fixture {
    sim: SimulatedHost,
    room: Arc<Room>,
    events: broadcast::Receiver<Event<Value>>,
}

impl Fixture {
    /// Route pending state changes to the room, like the app does
    fn deliver(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            if let Some(data) = event.parse::<StateChangedData>() {
                if let Some(new_state) = data.new_state {
                    self.room.notify_state(&data.entity_id, &new_state);
                }
            }
        }
    }

    fn advance_to(&mut self, when: NaiveDateTime) {
        self.sim.timers.advance_to(when);
        self.deliver();
    }

    fn set_state(&mut self, entity_id: &str, state: &str) {
        self.sim.states.set_state(&id(entity_id), state, HashMap::new());
        self.deliver();
    }

    fn last_temperature(&self) -> Option<f64> {
        self.sim
            .services
            .calls_of("climate.set_temperature")
            .last()
            .and_then(|call| call.get::<f64>("temperature"))
    }
}

fn make_test_fixture(
    sim: SimulatedHost,
    schedule: Schedule,
    settings: RoomSettings,
    actor_type: &str,
    actors: &[(&str, Value)],
) -> Fixture {
    let host = sim.host();
    make_test_fixture_on(sim, host, schedule, settings, actor_type, actors)
}

fn make_test_fixture_on(
    sim: SimulatedHost,
    host: Host,
    schedule: Schedule,
    settings: RoomSettings,
    actor_type: &str,
    actors: &[(&str, Value)],
) -> Fixture {
    let events = sim.bus.subscribe(STATE_CHANGED);
    let actor_type = actor_type_by_name(actor_type).unwrap();

    let snippets = HashMap::from([(
        "comfort".to_string(),
        Arc::new(vec![Rule::with_value(23.0)].into_iter().collect::<Schedule>()),
    )]);
    let mut engine = ExpressionEngine::new(sim.states.clone(), snippets);
    for (name, value) in actor_type.expression_globals() {
        engine = engine.with_global(name, value);
    }
    let evaluator = ScheduleEvaluator::new(
        Arc::new(engine),
        Arc::new(ActorTypeRules::new(Arc::clone(&actor_type))),
    );

    let actors = actors
        .iter()
        .map(|(entity_id, config)| {
            Actor::from_config(id(entity_id), Arc::clone(&actor_type), config).unwrap()
        })
        .collect();
    let room = Room::new(
        settings,
        host,
        actor_type,
        actors,
        Arc::new(schedule),
        evaluator,
    );
    Fixture { sim, room, events }
}

fn heating_schedule(day_end: NaiveTime) -> Schedule {
    vec![
        Rule::with_expression(WINDOW_RULE),
        Rule::builder()
            .start(t(7, 0))
            .end(day_end)
            .value(21.0)
            .build()
            .unwrap(),
        Rule::with_value(16.0),
    ]
    .into_iter()
    .collect()
}

fn make_test_heating(start: NaiveDateTime, day_end: NaiveTime) -> Fixture {
    let sim = SimulatedHost::new(start).with_device_emulation();
    sim.states.set_state(
        &id("climate.living"),
        "heat",
        HashMap::from([("temperature".to_string(), json!(18.0))]),
    );
    sim.states.set_state(&id("binary_sensor.window"), "off", HashMap::new());
    let mut fixture = make_test_fixture(
        sim,
        heating_schedule(day_end),
        RoomSettings::new("heating", "living"),
        "thermostat",
        &[("climate.living", json!({}))],
    );
    fixture.room.initialize(false);
    fixture.deliver();
    fixture
}

fn make_test_switches(settings: RoomSettings, entity_ids: &[&str]) -> Fixture {
    let sim = SimulatedHost::new(at(6, 0)).with_device_emulation();
    for entity_id in entity_ids {
        sim.states.set_state(&id(entity_id), "off", HashMap::new());
    }
    let actors: Vec<(&str, Value)> = entity_ids.iter().map(|e| (*e, json!({}))).collect();
    let mut fixture = make_test_fixture(
        sim,
        vec![Rule::with_value("off")].into_iter().collect(),
        settings,
        "switch",
        &actors,
    );
    fixture.room.initialize(false);
    fixture.deliver();
    fixture
}

#[test]
fn test_schedule_is_applied_and_followed() {
    let mut fx = make_test_heating(at(6, 0), t(22, 0));
    assert_eq!(fx.room.scheduled_value(), Some(json!(16.0)));
    assert_eq!(fx.room.wanted_value(), Some(json!(16.0)));
    assert_eq!(fx.last_temperature(), Some(16.0));
    assert!(fx.room.tracking_schedule());

    fx.advance_to(at(7, 0));
    assert_eq!(fx.room.scheduled_value(), Some(json!(21.0)));
    assert_eq!(fx.last_temperature(), Some(21.0));
    assert_eq!(
        fx.room.actor_values(),
        vec![(id("climate.living"), Some(json!(21.0)))]
    );

    fx.advance_to(at(22, 0));
    assert_eq!(fx.last_temperature(), Some(16.0));
    assert_eq!(fx.sim.timers.next_due(), Some(at(7, 0) + chrono::Duration::days(1)));
}

#[test]
fn test_unchanged_result_is_not_pushed_again() {
    let mut fx = make_test_heating(at(8, 0), t(22, 0));
    let pushes = fx.sim.services.calls().len();
    fx.room.trigger_reevaluation(false);
    fx.room.apply_schedule(false, false);
    fx.deliver();
    assert_eq!(fx.sim.services.calls().len(), pushes);
}

#[test]
fn test_unacknowledged_push_is_retried() {
    let sim = SimulatedHost::new(at(6, 0));
    sim.states.set_state(&id("switch.pump"), "off", HashMap::new());
    let fx = make_test_fixture(
        sim,
        vec![Rule::with_value("on")].into_iter().collect(),
        RoomSettings::new("garden", "shed"),
        "switch",
        &[("switch.pump", json!({"send_retries": 2, "send_retry_interval": 60}))],
    );
    fx.room.initialize(false);
    assert_eq!(fx.sim.services.calls_of("homeassistant.turn_on").len(), 1);

    fx.sim.timers.advance_to(at(6, 30));
    assert_eq!(fx.sim.services.calls_of("homeassistant.turn_on").len(), 3);

    // Having given up, the same value starts a new retry loop
    assert!(fx.room.set_value(json!("on"), false));
    assert!(!fx.room.set_value(json!("on"), false));
    assert!(fx.room.set_value(json!("on"), true));
    assert_eq!(fx.sim.services.calls_of("homeassistant.turn_on").len(), 5);
}

#[test]
fn test_repeated_value_while_sending_is_not_restarted() {
    let sim = SimulatedHost::new(at(6, 0));
    sim.states.set_state(&id("switch.pump"), "off", HashMap::new());
    let fx = make_test_fixture(
        sim,
        vec![Rule::with_value("off")].into_iter().collect(),
        RoomSettings::new("garden", "shed"),
        "switch",
        &[("switch.pump", json!({}))],
    );
    fx.room.initialize(false);
    assert!(fx.sim.services.calls().is_empty());

    assert!(fx.room.set_value(json!("on"), false));
    assert!(!fx.room.set_value(json!("on"), false));
    assert_eq!(fx.sim.services.calls().len(), 1);
}

#[test]
fn test_manual_value_with_rescheduling_delay() {
    let mut fx = make_test_heating(at(8, 0), t(22, 0));
    let value = fx
        .room
        .set_value_manually(
            ManualValue::Value(json!("19.5")),
            false,
            Some(ReschedulingDelay::Minutes(60.0)),
        )
        .unwrap();
    fx.deliver();
    assert_eq!(value, json!(19.5));
    assert_eq!(fx.last_temperature(), Some(19.5));
    assert_eq!(fx.room.rescheduling_time(), Some(at(9, 0)));
    assert!(!fx.room.tracking_schedule());

    // Re-evaluation doesn't override the manual value while the timer runs
    fx.room.trigger_reevaluation(false);
    assert_eq!(fx.room.wanted_value(), Some(json!(19.5)));

    fx.advance_to(at(9, 0));
    assert_eq!(fx.room.wanted_value(), Some(json!(21.0)));
    assert_eq!(fx.last_temperature(), Some(21.0));
    assert!(!fx.room.is_rescheduling_pending());
}

#[test]
fn test_manual_expressions() {
    let mut fx = make_test_heating(at(8, 0), t(22, 0));
    let zero = Some(ReschedulingDelay::Minutes(0.0));

    let value = fx
        .room
        .set_value_manually(ManualValue::Expression("19 + 1".into()), false, zero)
        .unwrap();
    assert_eq!(value, json!(20.0));
    assert!(!fx.room.is_rescheduling_pending());

    let value = fx
        .room
        .set_value_manually(
            ManualValue::Expression("IncludeSchedule('comfort')".into()),
            false,
            zero,
        )
        .unwrap();
    assert_eq!(value, json!(23.0));
    fx.deliver();
    assert_eq!(fx.last_temperature(), Some(23.0));

    assert!(matches!(
        fx.room
            .set_value_manually(ManualValue::Expression("Skip()".into()), false, zero),
        Err(RoomError::NoValue(_))
    ));
    assert!(matches!(
        fx.room
            .set_value_manually(ManualValue::Value(json!("warm")), false, zero),
        Err(RoomError::InvalidValue { .. })
    ));
    assert!(matches!(
        fx.room
            .set_value_manually(ManualValue::Expression("(".into()), false, zero),
        Err(RoomError::Expression { .. })
    ));
    assert_eq!(fx.room.wanted_value(), Some(json!(23.0)));
}

/// Manual 18 until 09:00 while the schedule says 21, window open at 08:10
fn make_test_overlaid(day_end: NaiveTime) -> Fixture {
    let mut fx = make_test_heating(at(8, 0), day_end);
    fx.room
        .set_value_manually(
            ManualValue::Value(json!(18.0)),
            false,
            Some(ReschedulingDelay::Minutes(60.0)),
        )
        .unwrap();
    fx.deliver();

    fx.advance_to(at(8, 10));
    fx.set_state("binary_sensor.window", "on");
    fx.room.trigger_reevaluation(false);
    fx.deliver();
    fx
}

#[test]
fn test_overlay_saves_override() {
    let fx = make_test_overlaid(t(22, 0));
    assert_eq!(
        fx.room.overlay(),
        Some((json!(18.0), Some(json!(21.0)), Some(at(9, 0))))
    );
    assert_eq!(fx.room.wanted_value(), Some(json!("OFF")));
    assert!(!fx.room.is_rescheduling_pending());
    let hvac_modes = fx.sim.services.calls_of("climate.set_hvac_mode");
    assert_eq!(
        hvac_modes.last().and_then(|c| c.get::<String>("hvac_mode")).as_deref(),
        Some("off")
    );
}

#[test]
fn test_overlay_restored_when_schedule_returns() {
    let mut fx = make_test_overlaid(t(22, 0));

    fx.advance_to(at(8, 20));
    fx.set_state("binary_sensor.window", "off");
    fx.room.trigger_reevaluation(false);
    fx.deliver();

    assert!(fx.room.overlay().is_none());
    assert_eq!(fx.room.wanted_value(), Some(json!(18.0)));
    assert_eq!(fx.room.rescheduling_time(), Some(at(9, 0)));

    fx.advance_to(at(9, 0));
    assert_eq!(fx.room.wanted_value(), Some(json!(21.0)));
    assert_eq!(fx.last_temperature(), Some(21.0));
}

#[test]
fn test_overlay_waits_for_deadline_when_schedule_moved_on() {
    let mut fx = make_test_overlaid(t(8, 15));

    fx.advance_to(at(8, 20));
    fx.set_state("binary_sensor.window", "off");
    fx.room.trigger_reevaluation(false);
    fx.deliver();

    assert_eq!(fx.room.scheduled_value(), Some(json!(16.0)));
    assert_eq!(fx.room.wanted_value(), Some(json!("OFF")));
    assert!(fx.room.overlay().is_some());

    fx.advance_to(at(9, 0));
    assert!(fx.room.overlay().is_none());
    assert_eq!(fx.room.wanted_value(), Some(json!(18.0)));
    assert!(!fx.room.is_rescheduling_pending());
}

/// Window rule marked with `marker` and 21 during the day; nothing at night
fn make_test_daytime_only(marker: &str) -> Fixture {
    let sim = SimulatedHost::new(at(8, 0)).with_device_emulation();
    sim.states.set_state(
        &id("climate.living"),
        "heat",
        HashMap::from([("temperature".to_string(), json!(18.0))]),
    );
    sim.states.set_state(&id("binary_sensor.window"), "off", HashMap::new());
    let schedule: Schedule = vec![
        Rule::builder()
            .start(t(7, 0))
            .end(t(22, 0))
            .expression(format!(
                "Mark(OFF, '{marker}') if is_on('binary_sensor.window') else Skip()"
            ))
            .build()
            .unwrap(),
        Rule::builder()
            .start(t(7, 0))
            .end(t(22, 0))
            .value(21.0)
            .build()
            .unwrap(),
    ]
    .into_iter()
    .collect();
    let mut fx = make_test_fixture(
        sim,
        schedule,
        RoomSettings::new("heating", "living"),
        "thermostat",
        &[("climate.living", json!({}))],
    );
    fx.room.initialize(false);
    fx.deliver();

    fx.advance_to(at(8, 10));
    fx.set_state("binary_sensor.window", "on");
    fx.room.trigger_reevaluation(false);
    fx.deliver();
    assert_eq!(fx.room.wanted_value(), Some(json!("OFF")));
    fx
}

#[test]
fn test_overlay_reverted_when_schedule_yields_nothing() {
    let mut fx = make_test_daytime_only("OVERLAY_REVERT_ON_NO_RESULT");
    assert_eq!(fx.room.overlay(), Some((json!(21.0), Some(json!(21.0)), None)));

    fx.advance_to(at(22, 0));
    assert!(fx.room.overlay().is_none());
    assert_eq!(fx.room.wanted_value(), Some(json!(21.0)));
    assert_eq!(fx.last_temperature(), Some(21.0));
}

#[test]
fn test_plain_overlay_kept_when_schedule_yields_nothing() {
    let mut fx = make_test_daytime_only("OVERLAY");
    fx.advance_to(at(22, 0));
    assert!(fx.room.overlay().is_some());
    assert_eq!(fx.room.wanted_value(), Some(json!("OFF")));
}

#[test]
fn test_reset_drops_overlay() {
    let mut fx = make_test_overlaid(t(22, 0));
    fx.set_state("binary_sensor.window", "off");
    fx.room.trigger_reevaluation(true);
    fx.deliver();

    assert!(fx.room.overlay().is_none());
    assert_eq!(fx.room.wanted_value(), Some(json!(21.0)));
    assert!(fx.room.tracking_schedule());
}

#[test]
fn test_manual_change_is_replicated() {
    let settings = RoomSettings::new("lights", "hall").with_rescheduling_delay(30.0);
    let mut fx = make_test_switches(settings, &["switch.a", "switch.b"]);
    assert!(fx.sim.services.calls().is_empty());

    fx.set_state("switch.a", "on");
    let turned_on = fx.sim.services.calls_of("homeassistant.turn_on");
    assert_eq!(turned_on.len(), 1);
    assert_eq!(turned_on[0].get::<String>("entity_id").as_deref(), Some("switch.b"));
    assert_eq!(fx.room.wanted_value(), Some(json!("on")));
    assert_eq!(fx.room.rescheduling_time(), Some(at(6, 30)));

    fx.advance_to(at(6, 30));
    assert_eq!(fx.sim.services.calls_of("homeassistant.turn_off").len(), 2);
    assert_eq!(fx.room.wanted_value(), Some(json!("off")));
}

#[test]
fn test_manual_change_back_to_schedule_cancels_rescheduling() {
    let settings = RoomSettings::new("lights", "hall").with_rescheduling_delay(30.0);
    let mut fx = make_test_switches(settings, &["switch.a", "switch.b"]);

    fx.set_state("switch.a", "on");
    assert!(fx.room.is_rescheduling_pending());

    fx.set_state("switch.a", "off");
    assert!(!fx.room.is_rescheduling_pending());
    assert!(fx.room.tracking_schedule());
}

#[test]
fn test_manual_change_is_reverted_when_not_allowed() {
    let settings = RoomSettings::new("lights", "hall").with_manual_changes(false);
    let mut fx = make_test_switches(settings, &["switch.a"]);

    fx.set_state("switch.a", "on");
    let turned_off = fx.sim.services.calls_of("homeassistant.turn_off");
    assert_eq!(turned_off.len(), 1);
    assert_eq!(fx.sim.states.get(&id("switch.a")).unwrap().state, "off");
    assert_eq!(fx.room.wanted_value(), Some(json!("off")));
}

#[test]
fn test_change_without_replication_starts_rescheduling() {
    let settings = RoomSettings::new("lights", "hall")
        .with_replication(false)
        .with_rescheduling_delay(10.0);
    let mut fx = make_test_switches(settings, &["switch.a", "switch.b"]);

    fx.set_state("switch.a", "on");
    assert!(fx.sim.services.calls().is_empty());
    assert_eq!(fx.room.wanted_value(), Some(json!("off")));

    fx.advance_to(at(6, 10));
    let turned_off = fx.sim.services.calls_of("homeassistant.turn_off");
    assert_eq!(turned_off.len(), 1);
    assert_eq!(turned_off[0].get::<String>("entity_id").as_deref(), Some("switch.a"));
}

#[test]
fn test_snapshot_published_once_per_operation() {
    let sim = SimulatedHost::new(at(6, 0)).with_device_emulation();
    sim.states.set_state(
        &id("climate.living"),
        "heat",
        HashMap::from([("temperature".to_string(), json!(18.0))]),
    );
    let mut rx = sim.bus.subscribe(STATE_CHANGED);
    let mut fx = make_test_fixture(
        sim,
        heating_schedule(t(22, 0)),
        RoomSettings::new("heating", "living"),
        "thermostat",
        &[("climate.living", json!({}))],
    );
    let persist_entity = fx.room.persist_entity().cloned().unwrap();
    assert_eq!(persist_entity.to_string(), "schedy_room.heating_living");

    let mut publications = move || {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if let Some(data) = event.parse::<StateChangedData>() {
                count += usize::from(data.entity_id == persist_entity);
            }
        }
        count
    };

    fx.room.initialize(false);
    fx.deliver();
    assert_eq!(publications(), 1);

    fx.room.trigger_reevaluation(false);
    assert_eq!(publications(), 0);

    fx.room
        .set_value_manually(ManualValue::Value(json!(19.0)), false, None)
        .unwrap();
    fx.deliver();
    assert_eq!(publications(), 1);

    let persisted = fx.sim.states.get(fx.room.persist_entity().unwrap()).unwrap();
    let serialize = |v: Value| fx.room.actor_type().serialize_value(&v).unwrap();
    assert_eq!(persisted.state, serialize(json!(16.0)));
    assert_eq!(persisted.attributes["wanted_value"], json!(serialize(json!(19.0))));
    assert_eq!(
        persisted.attributes["actors"]["climate.living"],
        json!(serialize(json!(19.0)))
    );
}

#[test]
fn test_state_restored_after_restart() {
    let mut fx = make_test_heating(at(8, 0), t(22, 0));
    fx.room
        .set_value_manually(
            ManualValue::Value(json!(18.0)),
            false,
            Some(ReschedulingDelay::Minutes(60.0)),
        )
        .unwrap();
    fx.deliver();
    fx.room.shutdown();
    let pushes = fx.sim.services.calls().len();

    let restarted = make_test_fixture(
        fx.sim.clone(),
        heating_schedule(t(22, 0)),
        RoomSettings::new("heating", "living"),
        "thermostat",
        &[("climate.living", json!({}))],
    );
    restarted.room.initialize(false);
    assert_eq!(restarted.room.wanted_value(), Some(json!(18.0)));
    assert_eq!(restarted.room.scheduled_value(), Some(json!(21.0)));
    assert_eq!(restarted.room.rescheduling_time(), Some(at(9, 0)));
    assert_eq!(restarted.sim.services.calls().len(), pushes);
    restarted.room.shutdown();

    let reset = make_test_fixture(
        fx.sim.clone(),
        heating_schedule(t(22, 0)),
        RoomSettings::new("heating", "living"),
        "thermostat",
        &[("climate.living", json!({}))],
    );
    reset.room.initialize(true);
    assert_eq!(reset.room.wanted_value(), Some(json!(21.0)));
    assert!(!reset.room.is_rescheduling_pending());
}

#[test]
fn test_actor_initialization_is_retried() {
    let sim = SimulatedHost::new(at(8, 0)).with_device_emulation();
    sim.states.set_state(&id("binary_sensor.window"), "off", HashMap::new());
    let fx = make_test_fixture(
        sim,
        heating_schedule(t(22, 0)),
        RoomSettings::new("heating", "living"),
        "thermostat",
        &[("climate.living", json!({}))],
    );
    fx.room.initialize(false);
    assert_eq!(fx.room.wanted_value(), Some(json!(21.0)));
    assert!(fx.sim.services.calls().is_empty());

    fx.sim.timers.advance_by(chrono::Duration::seconds(10));
    assert!(fx.sim.services.calls().is_empty());

    fx.sim.states.set_state(
        &id("climate.living"),
        "off",
        HashMap::from([("temperature".to_string(), json!(5.0))]),
    );
    fx.sim.timers.advance_by(chrono::Duration::seconds(10));
    assert_eq!(fx.last_temperature(), Some(21.0));
}

#[test]
fn test_out_of_range_delay_is_rejected() {
    let mut fx = make_test_switches(RoomSettings::new("lights", "hall"), &["switch.lamp"]);
    let pushes = fx.sim.services.calls().len();

    let result = fx.room.set_value_manually(
        ManualValue::Value(json!("on")),
        false,
        Some(ReschedulingDelay::Minutes(1e12)),
    );
    assert!(matches!(result, Err(RoomError::DelayOutOfRange(_))));
    fx.deliver();
    assert_eq!(fx.room.wanted_value(), Some(json!("off")));
    assert_eq!(fx.sim.services.calls().len(), pushes);
    assert!(!fx.room.is_rescheduling_pending());

    assert!(fx
        .room
        .start_rescheduling_timer(Some(ReschedulingDelay::Minutes(f64::MAX)))
        .is_err());
    assert!(!fx.room.is_rescheduling_pending());
}

/// Timers whose cancellation can't stop a callback, like a tokio task that
/// already woke up and waits for the room lock
struct UncancellableTimers(Arc<ManualTimers>);

impl TimerService for UncancellableTimers {
    fn now(&self) -> NaiveDateTime {
        self.0.now()
    }

    fn run_at(&self, when: NaiveDateTime, callback: TimerCallback) -> TimerHandle {
        self.0.run_at(when, callback)
    }

    fn cancel(&self, _handle: TimerHandle) {}
}

#[test]
fn test_cancelled_timers_firing_late_are_ignored() {
    let sim = SimulatedHost::new(at(6, 0)).with_device_emulation();
    sim.states.set_state(&id("switch.lamp"), "off", HashMap::new());
    let host = Host::new(
        sim.states.clone(),
        sim.services.clone(),
        Arc::new(UncancellableTimers(Arc::clone(&sim.timers))),
    );
    let mut fx = make_test_fixture_on(
        sim,
        host,
        vec![Rule::with_value("off")].into_iter().collect(),
        RoomSettings::new("lights", "hall"),
        "switch",
        &[("switch.lamp", json!({}))],
    );
    fx.room.initialize(false);
    fx.deliver();

    for minutes in [60.0, 120.0] {
        fx.room
            .set_value_manually(
                ManualValue::Value(json!("on")),
                false,
                Some(ReschedulingDelay::Minutes(minutes)),
            )
            .unwrap();
        fx.deliver();
    }

    // the replaced 07:00 timer still runs
    fx.advance_to(at(7, 0));
    assert_eq!(fx.room.wanted_value(), Some(json!("on")));
    assert!(fx.room.is_rescheduling_pending());
    assert_eq!(fx.room.rescheduling_time(), Some(at(8, 0)));

    fx.advance_to(at(8, 0));
    assert_eq!(fx.room.wanted_value(), Some(json!("off")));
    assert!(!fx.room.is_rescheduling_pending());
}
