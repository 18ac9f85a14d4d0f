//! YAML configuration for Schedy
//!
//! A configuration file maps app names to app configurations, in the shape
//! of an AppDaemon `apps.yaml`:
//!
//! ```yaml
//! heating:
//!   module: hass_apps_loader
//!   class: SchedyApp
//!   actor_type: thermostat
//!   actor_templates:
//!     default:
//!       send_retries: 5
//!   rooms:
//!     living:
//!       rescheduling_delay: 120
//!       actors:
//!         climate.living:
//!       schedule:
//!         - { start: "07:00", end: "22:00", weekdays: 1-5, v: 21 }
//!         - v: 16
//! ```
//!
//! Loading runs in three stages: [`YamlLoader`] resolves tags such as
//! `!include` and `!secret`, the result is deserialized into the
//! [`model`] types, and [`AppDefinition::from_config`] validates it and
//! builds schedules and actor configurations.

mod definition;
mod error;
mod loader;
pub mod model;
mod rules;

use std::path::Path;

use indexmap::IndexMap;
use serde_yaml::Value;
use tracing::{debug, info};

pub use definition::{
    resolve_actor_config, ActorDefinition, AppDefinition, RoomDefinition, StatisticsDefinition,
    WatchedEntity, ALL_ATTRIBUTES, DEFAULT_TEMPLATE, STATE_ATTRIBUTE,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use model::{AppConfig, WatchMode};
pub use rules::{build_rule, build_schedule, build_validated_schedule, for_each_expression};

/// Build the definitions of every Schedy app in a processed YAML document
pub fn parse_apps(document: Value) -> ConfigResult<Vec<AppDefinition>> {
    let apps: IndexMap<String, Value> = match document {
        Value::Null => IndexMap::new(),
        other => serde_yaml::from_value(other).map_err(|e| {
            ConfigError::invalid("<root>", format!("expected a mapping of apps: {e}"))
        })?,
    };

    let mut definitions = Vec::new();
    for (name, raw) in apps {
        let config: AppConfig =
            serde_yaml::from_value(raw).map_err(|e| ConfigError::invalid(&name, e))?;
        if !config.is_schedy_app() {
            debug!(app = %name, class = ?config.class, "Skipping app of another class");
            continue;
        }
        definitions.push(AppDefinition::from_config(&name, &config)?);
    }
    Ok(definitions)
}

/// Load a configuration file and build the definitions of its Schedy apps
pub fn load_apps(path: impl AsRef<Path>) -> ConfigResult<Vec<AppDefinition>> {
    let path = path.as_ref();
    let config_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file = path.file_name().map(Path::new).unwrap_or(path);
    let document = YamlLoader::new(config_dir).load_file(file)?;
    let apps = parse_apps(document)?;
    info!(path = %path.display(), apps = apps.len(), "Loaded configuration");
    Ok(apps)
}

/// Build app definitions from YAML text without tag resolution from disk
pub fn parse_apps_str(content: &str) -> ConfigResult<Vec<AppDefinition>> {
    let document = YamlLoader::new(".").load_string(content, Path::new("<inline>"))?;
    parse_apps(document)
}
