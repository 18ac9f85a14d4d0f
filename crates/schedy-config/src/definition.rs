//! Validated app definitions built from the configuration model
//!
//! An [`AppDefinition`] holds everything needed to create the rooms of one
//! app: the actor type, the resolved configuration of every actor, the
//! composed schedule of every room and the entities each room watches.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use schedy_actor::{actor_type_by_name, actor_type_names, merge_config, Actor, ActorType};
use schedy_core::EntityId;
use schedy_room::RoomSettings;
use schedy_schedule::Schedule;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    AppConfig, Attributes, RoomConfig, StatisticsConfig, WatchMode, WatchedEntityConfig,
};
use crate::rules::build_validated_schedule;

/// Template applied to actors that don't name one, if it is defined
pub const DEFAULT_TEMPLATE: &str = "default";

/// Attribute name standing for the state string itself
pub const STATE_ATTRIBUTE: &str = "state";

/// Attribute name standing for any change of the entity
pub const ALL_ATTRIBUTES: &str = "all";

#[derive(Debug, Clone, PartialEq)]
pub struct WatchedEntity {
    pub entity_id: EntityId,
    pub attributes: Vec<String>,
    pub mode: WatchMode,
}

impl WatchedEntity {
    fn from_config(config: &WatchedEntityConfig, key: &str) -> ConfigResult<Self> {
        let (entity, attributes, mode) = match config {
            WatchedEntityConfig::Short(raw) => parse_watched_entity(raw, key)?,
            WatchedEntityConfig::Full {
                entity,
                attributes,
                mode,
            } => {
                let attributes = match attributes {
                    Some(Attributes::One(attribute)) => vec![attribute.clone()],
                    Some(Attributes::Many(attributes)) => attributes.clone(),
                    None => Vec::new(),
                };
                (entity.clone(), attributes, *mode)
            }
        };

        let entity_id: EntityId = entity
            .parse()
            .map_err(|e| ConfigError::invalid(format!("{key}.entity"), e))?;
        let attributes = if attributes.is_empty() {
            vec![STATE_ATTRIBUTE.to_string()]
        } else {
            attributes
        };
        Ok(Self {
            entity_id,
            attributes,
            mode,
        })
    }

    /// Whether a change of `attribute` concerns this watch
    pub fn watches(&self, attribute: &str) -> bool {
        self.attributes
            .iter()
            .any(|a| a == attribute || a == ALL_ATTRIBUTES)
    }
}

impl fmt::Display for WatchedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{:?}",
            self.entity_id,
            self.attributes.join(","),
            self.mode
        )
    }
}

/// Parse the `entity[:attr,attr][:mode]` short form
fn parse_watched_entity(raw: &str, key: &str) -> ConfigResult<(String, Vec<String>, WatchMode)> {
    let mut parts = raw.split(':').map(str::trim);
    let entity = parts.next().unwrap_or_default().to_string();
    let attributes = match parts.next() {
        Some(attributes) if !attributes.is_empty() => attributes
            .split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    let mode = match parts.next() {
        None | Some("") | Some("reevaluate") => WatchMode::Reevaluate,
        Some("reset") => WatchMode::Reset,
        Some("ignore") => WatchMode::Ignore,
        Some(other) => {
            return Err(ConfigError::invalid(
                key,
                format!("unknown mode '{other}', expected reevaluate, reset or ignore"),
            ))
        }
    };
    if parts.next().is_some() {
        return Err(ConfigError::invalid(key, "too many ':' separated parts"));
    }
    Ok((entity, attributes, mode))
}

fn watched_entities(
    configs: &[WatchedEntityConfig],
    key: &str,
) -> ConfigResult<Vec<WatchedEntity>> {
    configs
        .iter()
        .enumerate()
        .map(|(index, config)| WatchedEntity::from_config(config, &format!("{key}[{index}]")))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ActorDefinition {
    pub entity_id: EntityId,
    /// Configuration with templates merged in
    pub config: Value,
}

#[derive(Debug, Clone)]
pub struct RoomDefinition {
    pub settings: RoomSettings,
    pub actors: Vec<ActorDefinition>,
    pub schedule: Arc<Schedule>,
    /// App-level watches not ignored by the room, then the room's own
    pub watched_entities: Vec<WatchedEntity>,
}

/// A statistical parameter published by an app
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsDefinition {
    pub name: String,
    /// One of the statistics of the app's actor type
    pub kind: &'static str,
    /// Names of the rooms whose actors count, in configuration order
    pub rooms: Vec<String>,
    pub factors: HashMap<EntityId, f64>,
    pub weights: HashMap<EntityId, f64>,
    pub off_value: Option<f64>,
}

impl StatisticsDefinition {
    fn from_config(
        name: &str,
        config: &StatisticsConfig,
        actor_type: &Arc<dyn ActorType>,
        room_names: &[&String],
        key: &str,
    ) -> ConfigResult<Self> {
        let kind = actor_type
            .statistics()
            .iter()
            .copied()
            .find(|kind| *kind == config.kind)
            .ok_or_else(|| {
                ConfigError::invalid(
                    format!("{key}.type"),
                    format!(
                        "statistical parameter '{}' is not available for actor type {}",
                        config.kind,
                        actor_type.name()
                    ),
                )
            })?;

        let rooms = if config.rooms.is_empty() {
            room_names.iter().map(|name| name.to_string()).collect()
        } else {
            let mut rooms = Vec::with_capacity(config.rooms.len());
            for (room, settings) in &config.rooms {
                let room_key = format!("{key}.rooms.{room}");
                if !room_names.contains(&room) {
                    return Err(ConfigError::invalid(room_key, "no room of that name"));
                }
                match settings {
                    Value::Null => {}
                    Value::Object(map) if map.is_empty() => {}
                    _ => return Err(ConfigError::invalid(room_key, "rooms take no settings")),
                }
                rooms.push(room.clone());
            }
            rooms
        };

        let factors =
            entity_numbers(&config.factors, &format!("{key}.factors"), |f| f > 0.0, "> 0")?;
        let weights =
            entity_numbers(&config.weights, &format!("{key}.weights"), |w| w >= 0.0, ">= 0")?;
        if config.off_value.is_some_and(|v| !v.is_finite()) {
            return Err(ConfigError::invalid(format!("{key}.off_value"), "must be a finite number"));
        }

        Ok(Self {
            name: name.to_string(),
            kind,
            rooms,
            factors,
            weights,
            off_value: config.off_value,
        })
    }
}

fn entity_numbers(
    numbers: &indexmap::IndexMap<String, f64>,
    key: &str,
    valid: impl Fn(f64) -> bool,
    expected: &str,
) -> ConfigResult<HashMap<EntityId, f64>> {
    numbers
        .iter()
        .map(|(entity_id, number)| {
            let entry_key = format!("{key}.{entity_id}");
            let entity_id: EntityId = entity_id
                .parse()
                .map_err(|e| ConfigError::invalid(&entry_key, e))?;
            if !number.is_finite() || !valid(*number) {
                return Err(ConfigError::invalid(entry_key, format!("must be {expected}")));
            }
            Ok((entity_id, *number))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct AppDefinition {
    pub name: String,
    pub actor_type: Arc<dyn ActorType>,
    pub reset_at_startup: bool,
    pub expressions_from_events: bool,
    pub snippets: HashMap<String, Arc<Schedule>>,
    pub rooms: Vec<RoomDefinition>,
    pub statistics: Vec<StatisticsDefinition>,
}

impl AppDefinition {
    /// Validate an app configuration and build its definition
    pub fn from_config(name: &str, config: &AppConfig) -> ConfigResult<Self> {
        let actor_type = actor_type_by_name(&config.actor_type).map_err(|_| {
            ConfigError::invalid(
                format!("{name}.actor_type"),
                format!(
                    "unknown actor type '{}', expected one of {}",
                    config.actor_type,
                    actor_type_names().join(", ")
                ),
            )
        })?;

        let prepend = build_validated_schedule(
            "prepend",
            &config.schedule_prepend,
            &format!("{name}.schedule_prepend"),
        )?;
        let append = build_validated_schedule(
            "append",
            &config.schedule_append,
            &format!("{name}.schedule_append"),
        )?;

        let mut snippets = HashMap::new();
        for (snippet, rules) in &config.schedule_snippets {
            let schedule = build_validated_schedule(
                snippet,
                rules,
                &format!("{name}.schedule_snippets.{snippet}"),
            )?;
            snippets.insert(snippet.clone(), schedule);
        }

        let app_watches =
            watched_entities(&config.watched_entities, &format!("{name}.watched_entities"))?;

        let rooms = config
            .rooms
            .iter()
            .map(|(room_name, room)| {
                build_room(
                    name,
                    room_name,
                    room,
                    config,
                    &actor_type,
                    (&prepend, &append),
                    &app_watches,
                )
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        let room_names: Vec<&String> = config.rooms.keys().collect();
        let statistics = config
            .statistics
            .iter()
            .map(|(stat_name, stat)| {
                StatisticsDefinition::from_config(
                    stat_name,
                    stat,
                    &actor_type,
                    &room_names,
                    &format!("{name}.statistics.{stat_name}"),
                )
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        debug!(
            app = name,
            actor_type = actor_type.name(),
            rooms = rooms.len(),
            snippets = snippets.len(),
            statistics = statistics.len(),
            "Built app definition"
        );
        Ok(Self {
            name: name.to_string(),
            actor_type,
            reset_at_startup: config.reset_at_startup,
            expressions_from_events: config.expressions_from_events,
            snippets,
            rooms,
            statistics,
        })
    }

    pub fn room(&self, name: &str) -> Option<&RoomDefinition> {
        self.rooms.iter().find(|room| room.settings.name == name)
    }
}

fn build_room(
    app_name: &str,
    room_name: &str,
    room: &RoomConfig,
    app: &AppConfig,
    actor_type: &Arc<dyn ActorType>,
    (prepend, append): (&Arc<Schedule>, &Arc<Schedule>),
    app_watches: &[WatchedEntity],
) -> ConfigResult<RoomDefinition> {
    let key = format!("{app_name}.rooms.{room_name}");

    if room.rescheduling_delay < 0.0 || !room.rescheduling_delay.is_finite() {
        return Err(ConfigError::invalid(
            format!("{key}.rescheduling_delay"),
            "must be a non-negative number of minutes",
        ));
    }
    let mut settings = RoomSettings::new(app_name, room_name)
        .with_manual_changes(room.allow_manual_changes)
        .with_replication(room.replicate_changes)
        .with_rescheduling_delay(room.rescheduling_delay);
    if let Some(friendly_name) = &room.friendly_name {
        settings = settings.with_friendly_name(friendly_name);
    }

    let mut actors = Vec::with_capacity(room.actors.len());
    for (entity_id, actor_config) in &room.actors {
        let actor_key = format!("{key}.actors.{entity_id}");
        let entity_id: EntityId = entity_id
            .parse()
            .map_err(|e| ConfigError::invalid(&actor_key, e))?;
        let config = resolve_actor_config(actor_config, &app.actor_templates, &actor_key)?;
        Actor::from_config(entity_id.clone(), Arc::clone(actor_type), &config)
            .map_err(|e| ConfigError::invalid(&actor_key, e))?;
        actors.push(ActorDefinition { entity_id, config });
    }

    let own = build_validated_schedule(room_name, &room.schedule, &format!("{key}.schedule"))?;
    let schedule = Schedule::named(room_name)
        .concat(prepend)
        .concat(&own)
        .concat(append);

    let own_watches =
        watched_entities(&room.watched_entities, &format!("{key}.watched_entities"))?;
    let ignored: HashSet<&EntityId> = own_watches
        .iter()
        .filter(|w| w.mode == WatchMode::Ignore)
        .map(|w| &w.entity_id)
        .collect();
    let watched_entities = app_watches
        .iter()
        .filter(|w| !ignored.contains(&w.entity_id))
        .chain(own_watches.iter())
        .filter(|w| w.mode != WatchMode::Ignore)
        .cloned()
        .collect();

    Ok(RoomDefinition {
        settings,
        actors,
        schedule: Arc::new(schedule),
        watched_entities,
    })
}

/// Merge an actor configuration over the templates it names
///
/// Templates may name templates themselves; the actor's own keys win over
/// its template's, which win over the template's template and so on. The
/// `default` template applies to actors naming none, if it exists.
pub fn resolve_actor_config(
    config: &Value,
    templates: &indexmap::IndexMap<String, Value>,
    key: &str,
) -> ConfigResult<Value> {
    let mut own = match config {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        _ => return Err(ConfigError::invalid(key, "actor configuration must be a mapping")),
    };
    if !own.contains_key("template") && templates.contains_key(DEFAULT_TEMPLATE) {
        own.insert("template".into(), Value::String(DEFAULT_TEMPLATE.into()));
    }

    let mut chain = vec![own];
    let mut seen = HashSet::new();
    while let Some(name) = chain.last_mut().and_then(|layer| layer.remove("template")) {
        let Value::String(name) = name else {
            return Err(ConfigError::invalid(
                format!("{key}.template"),
                "template name must be a string",
            ));
        };
        if !seen.insert(name.clone()) {
            return Err(ConfigError::invalid(
                format!("{key}.template"),
                format!("template '{name}' includes itself"),
            ));
        }
        let layer = match templates.get(&name) {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) => Map::new(),
            Some(_) => {
                return Err(ConfigError::invalid(
                    format!("actor_templates.{name}"),
                    "template must be a mapping",
                ))
            }
            None => {
                return Err(ConfigError::invalid(
                    format!("{key}.template"),
                    format!("no template named '{name}' has been defined"),
                ))
            }
        };
        chain.push(layer);
    }

    let mut merged = Value::Object(Map::new());
    for layer in chain.into_iter().rev() {
        merge_config(&mut merged, &Value::Object(layer));
    }
    Ok(merged)
}
