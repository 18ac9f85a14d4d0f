//! Delivery of values to actors against the simulated host

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use schedy_actor::{actor_type_by_name, Actor, ActorSettings};
use schedy_core::{EntityId, Host, StateStore, TimerCallback};
use schedy_host::SimulatedHost;
use serde_json::{json, Value};

fn make_test_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 14)
        .unwrap()
        .and_hms_opt(7, 0, 0)
        .unwrap()
}

fn make_test_actor(actor_type: &str, entity_id: &str, config: Value) -> Arc<Mutex<Actor>> {
    let actor_type = actor_type_by_name(actor_type).unwrap();
    let entity_id: EntityId = entity_id.parse().unwrap();
    Arc::new(Mutex::new(
        Actor::from_config(entity_id, actor_type, &config).unwrap(),
    ))
}

fn resend_callback(actor: Arc<Mutex<Actor>>, host: Host, generation: u64, left: u32) -> TimerCallback {
    Box::new(move || {
        let factory = |g, l| resend_callback(Arc::clone(&actor), host.clone(), g, l);
        actor.lock().resend(generation, left, &host, &factory);
    })
}

fn set_value(actor: &Arc<Mutex<Actor>>, host: &Host, value: Value, force: bool) -> (bool, Option<Value>) {
    let factory = |g, l| resend_callback(Arc::clone(actor), host.clone(), g, l);
    actor.lock().set_value(value, force, host, &factory)
}

#[test]
fn test_unconfirmed_value_is_pushed_retries_plus_one_times() {
    let sim = SimulatedHost::new(make_test_start());
    let host = sim.host();
    let actor = make_test_actor(
        "switch",
        "switch.heater",
        json!({"send_retries": 3, "send_retry_interval": 30}),
    );

    let (sent, wanted) = set_value(&actor, &host, json!("on"), false);
    assert!(sent);
    assert_eq!(wanted, Some(json!("on")));
    assert!(actor.lock().is_sending());

    sim.timers.advance_by(Duration::minutes(10));

    assert_eq!(sim.services.calls_of("homeassistant.turn_on").len(), 4);
    let actor = actor.lock();
    assert!(actor.gave_up());
    assert!(!actor.is_sending());
    assert_eq!(actor.wanted_value(), Some(&json!("on")));
    assert_eq!(sim.timers.pending(), 0);
}

#[test]
fn test_confirmation_stops_resending() {
    let sim = SimulatedHost::new(make_test_start());
    let host = sim.host();
    let entity_id: EntityId = "switch.heater".parse().unwrap();
    let actor = make_test_actor("switch", "switch.heater", json!({}));

    set_value(&actor, &host, json!("on"), false);
    sim.timers.advance_by(Duration::seconds(45));
    assert_eq!(sim.services.calls().len(), 2);

    sim.states.set(&entity_id, "on", Default::default());
    let state = sim.states.get(&entity_id).unwrap();
    let observation = actor.lock().notify_state(&state, &host).unwrap();
    assert!(observation.changed);
    assert!(actor.lock().is_synced());

    sim.timers.advance_by(Duration::hours(1));
    assert_eq!(sim.services.calls().len(), 2);
}

#[test]
fn test_unchanged_value_is_not_resent() {
    let sim = SimulatedHost::new(make_test_start()).with_device_emulation();
    let host = sim.host();
    let entity_id: EntityId = "climate.bath".parse().unwrap();
    sim.states.set(
        &entity_id,
        "heat",
        [("temperature".to_string(), json!(20.0))].into(),
    );

    let actor = make_test_actor("thermostat", "climate.bath", json!({}));
    assert!(actor.lock().initialize(&host));
    assert_eq!(actor.lock().current_value(), Some(&json!(20.0)));

    let (sent, _) = set_value(&actor, &host, json!(21), false);
    assert!(sent);
    // The emulated thermostat followed; report it back
    let state = sim.states.get(&entity_id).unwrap();
    actor.lock().notify_state(&state, &host);
    assert!(actor.lock().is_synced());
    let pushed = sim.services.take_calls().len();
    assert_eq!(pushed, 2);

    let (sent, wanted) = set_value(&actor, &host, json!(21.0), false);
    assert!(!sent);
    assert_eq!(wanted, Some(json!(21.0)));
    assert!(sim.services.calls().is_empty());

    let (sent, _) = set_value(&actor, &host, json!(21.0), true);
    assert!(sent);
    assert_eq!(sim.services.calls().len(), 2);
}

#[test]
fn test_repeated_value_while_sending_is_not_restarted() {
    let sim = SimulatedHost::new(make_test_start());
    let host = sim.host();
    let actor = make_test_actor("switch", "switch.heater", json!({"send_retries": 2}));

    assert!(set_value(&actor, &host, json!("on"), false).0);
    assert!(!set_value(&actor, &host, json!("on"), false).0);
    assert_eq!(sim.services.calls().len(), 1);

    assert!(set_value(&actor, &host, json!("off"), false).0);
    sim.timers.advance_by(Duration::hours(1));
    assert_eq!(sim.services.calls_of("homeassistant.turn_on").len(), 1);
    assert_eq!(sim.services.calls_of("homeassistant.turn_off").len(), 3);
}

#[test]
fn test_uninitialized_without_state() {
    let sim = SimulatedHost::new(make_test_start());
    let host = sim.host();
    let actor = make_test_actor("thermostat", "climate.cellar", json!({}));
    assert!(!actor.lock().initialize(&host));
    assert!(!actor.lock().is_initialized());
}

#[test]
fn test_filtered_value_is_not_sent() {
    let sim = SimulatedHost::new(make_test_start());
    let host = sim.host();
    let actor = make_test_actor(
        "generic",
        "input_select.mode",
        json!({"states": {"eco": {"service": "input_select.select_option", "value_param": "option"}}}),
    );

    let (sent, wanted) = set_value(&actor, &host, json!("boost"), false);
    assert!(!sent);
    assert_eq!(wanted, None);
    assert!(sim.services.calls().is_empty());

    let (sent, _) = set_value(&actor, &host, json!("eco"), false);
    assert!(sent);
    assert_eq!(sim.services.calls()[0].get::<String>("option").as_deref(), Some("eco"));
}

#[test]
fn test_sub_second_retry_interval() {
    let sim = SimulatedHost::new(make_test_start());
    let host = sim.host();
    let actor_type = actor_type_by_name("switch").unwrap();
    let entity_id: EntityId = "switch.heater".parse().unwrap();
    let adapter = actor_type.create_adapter(&entity_id, &json!({})).unwrap();
    let settings = ActorSettings {
        send_retries: 1,
        send_retry_interval: std::time::Duration::from_millis(1500),
        ..Default::default()
    };
    let actor = Arc::new(Mutex::new(Actor::new(entity_id, settings, actor_type, adapter)));

    set_value(&actor, &host, json!("on"), false);
    assert_eq!(sim.timers.next_due(), Some(make_test_start() + Duration::milliseconds(1500)));
    sim.timers.advance_by(Duration::seconds(1));
    assert_eq!(sim.services.calls().len(), 1);
    sim.timers.advance_by(Duration::seconds(1));
    assert_eq!(sim.services.calls().len(), 2);
}
