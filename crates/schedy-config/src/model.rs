//! Typed model of a Schedy configuration file
//!
//! The file maps app names to app configurations. Entries carrying a `class`
//! other than `SchedyApp` belong to other apps sharing the file and are
//! skipped. Empty sections (`rooms:` with nothing below) read as empty.

use indexmap::IndexMap;
use schedy_schedule::PartialDate;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Class name identifying Schedy apps in a shared apps file
pub const APP_CLASS: &str = "SchedyApp";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_actor_type() -> String {
    "generic".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default = "default_actor_type")]
    pub actor_type: String,
    #[serde(default)]
    pub reset_at_startup: bool,
    #[serde(default)]
    pub expressions_from_events: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub actor_templates: IndexMap<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub watched_entities: Vec<WatchedEntityConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub schedule_prepend: Vec<RuleConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub schedule_append: Vec<RuleConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub schedule_snippets: IndexMap<String, Vec<RuleConfig>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rooms: IndexMap<String, RoomConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub statistics: IndexMap<String, StatisticsConfig>,
}

impl AppConfig {
    pub fn is_schedy_app(&self) -> bool {
        self.class.as_deref().map_or(true, |class| class == APP_CLASS)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomConfig {
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default = "default_true")]
    pub allow_manual_changes: bool,
    #[serde(default = "default_true")]
    pub replicate_changes: bool,
    /// Minutes, 0 disables re-scheduling
    #[serde(default)]
    pub rescheduling_delay: f64,
    /// Entity id -> actor configuration
    #[serde(default, deserialize_with = "null_as_default")]
    pub actors: IndexMap<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub watched_entities: Vec<WatchedEntityConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub schedule: Vec<RuleConfig>,
}

fn default_off_value() -> Option<f64> {
    Some(0.0)
}

/// A statistical parameter aggregated over the actors of some rooms
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatisticsConfig {
    #[serde(rename = "type")]
    pub kind: String,
    /// Room name -> room settings; every room if empty
    #[serde(default, deserialize_with = "null_as_default")]
    pub rooms: IndexMap<String, Value>,
    /// Entity id -> factor its value is multiplied with
    #[serde(default, deserialize_with = "null_as_default")]
    pub factors: IndexMap<String, f64>,
    /// Entity id -> weight of its value in the average
    #[serde(default, deserialize_with = "null_as_default")]
    pub weights: IndexMap<String, f64>,
    /// Value of actors that are off; `null` leaves them out
    #[serde(default = "default_off_value")]
    pub off_value: Option<f64>,
}

/// A range spec given as a single number or as a spec string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RangeSpec {
    Number(i64),
    Spec(String),
}

impl RangeSpec {
    pub fn as_spec(&self) -> String {
        match self {
            RangeSpec::Number(n) => n.to_string(),
            RangeSpec::Spec(spec) => spec.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// `[HH:MM[:SS]][{+-}Nd]`
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub years: Option<RangeSpec>,
    #[serde(default)]
    pub months: Option<RangeSpec>,
    #[serde(default)]
    pub days: Option<RangeSpec>,
    #[serde(default)]
    pub weeks: Option<RangeSpec>,
    #[serde(default)]
    pub weekdays: Option<RangeSpec>,
    #[serde(default)]
    pub start_date: Option<PartialDate>,
    #[serde(default)]
    pub end_date: Option<PartialDate>,
    #[serde(default, alias = "x")]
    pub expression: Option<String>,
    #[serde(default, alias = "v")]
    pub value: Option<Value>,
    /// Nested rules turn this rule into a sub-schedule rule
    #[serde(default)]
    pub rules: Option<Vec<RuleConfig>>,
}

/// What a change of a watched entity does to the rooms watching it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    #[default]
    Reevaluate,
    Reset,
    /// Stop watching an entity the app watches for every room
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Attributes {
    One(String),
    Many(Vec<String>),
}

/// A watched entity as written: `"entity[:attr,attr][:mode]"` or a mapping
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WatchedEntityConfig {
    Short(String),
    Full {
        entity: String,
        #[serde(default)]
        attributes: Option<Attributes>,
        #[serde(default)]
        mode: WatchMode,
    },
}
