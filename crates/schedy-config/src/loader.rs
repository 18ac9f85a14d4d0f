//! YAML loading with tag support
//!
//! Configuration files may use these tags:
//! - `!include path` - Include another YAML file
//! - `!include_dir_named dir` - Include every YAML file of a directory as a
//!   mapping keyed by file name, handy for one file per room
//! - `!secret key` - Substitute from `secrets.yaml` next to the main file
//! - `!env_var VAR` - Environment variable substitution
//!
//! Mapping keys that aren't strings (`2026: ...`) are turned into strings so
//! the result can be handed to serde models expecting string keys.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::{debug, trace};

use crate::error::{ConfigError, ConfigResult};

const SECRETS_FILE: &str = "secrets.yaml";

/// Loader resolving tags relative to a configuration directory
pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Option<HashMap<String, String>>,
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets: None,
            include_stack: HashSet::new(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!(path = %path.display(), "Loading YAML file");

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);
        result
    }

    /// Load and process YAML from a string, resolving includes relative to `source_path`
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source,
            })?;
        self.process(value, source_path)
    }

    fn process(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                trace!(tag = %tag, "Processing tag");
                match tag.as_str() {
                    "!include" => {
                        let path = self.tag_path(&tagged.value, source_path)?;
                        self.load_file(path)
                    }
                    "!include_dir_named" => {
                        let dir = self.tag_path(&tagged.value, source_path)?;
                        self.include_dir_named(&dir)
                    }
                    "!secret" => {
                        let key = tag_string(&tagged.value, "!secret")?;
                        self.secret(&key).map(Value::String)
                    }
                    "!env_var" => {
                        let var = tag_string(&tagged.value, "!env_var")?;
                        std::env::var(&var)
                            .map(Value::String)
                            .map_err(|_| ConfigError::EnvVarNotFound { var })
                    }
                    _ => Err(ConfigError::invalid(tag, "unknown YAML tag")),
                }
            }
            Value::Mapping(map) => {
                let mut result = Mapping::with_capacity(map.len());
                for (key, value) in map {
                    let key = match self.process(key, source_path)? {
                        Value::Number(n) => Value::String(n.to_string()),
                        Value::Bool(b) => Value::String(b.to_string()),
                        other => other,
                    };
                    result.insert(key, self.process(value, source_path)?);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn include_dir_named(&mut self, dir: &Path) -> ConfigResult<Value> {
        debug!(dir = %dir.display(), "Including directory as named mapping");
        let entries = fs::read_dir(dir).map_err(|source| ConfigError::ReadFile {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        let mut result = Mapping::new();
        for file in files {
            let name = file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let content = self.load_file(&file)?;
            result.insert(Value::String(name), content);
        }
        Ok(Value::Mapping(result))
    }

    fn secret(&mut self, key: &str) -> ConfigResult<String> {
        if self.secrets.is_none() {
            self.secrets = Some(load_secrets(&self.config_dir.join(SECRETS_FILE))?);
        }
        self.secrets
            .as_ref()
            .and_then(|secrets| secrets.get(key))
            .cloned()
            .ok_or_else(|| ConfigError::SecretNotFound {
                key: key.to_string(),
            })
    }

    fn tag_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let Value::String(raw) = value else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{value:?}"),
                reason: "path must be a string".to_string(),
            });
        };
        let path = Path::new(raw);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let base = source_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(&self.config_dir);
        Ok(base.join(path))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }
}

fn tag_string(value: &Value, tag: &str) -> ConfigResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        _ => Err(ConfigError::invalid(tag, "argument must be a string")),
    }
}

fn load_secrets(path: &Path) -> ConfigResult<HashMap<String, String>> {
    if !path.exists() {
        debug!(path = %path.display(), "No secrets file");
        return Ok(HashMap::new());
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: HashMap<String, Value> =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                other => serde_yaml::to_string(&other)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            };
            (key, value)
        })
        .collect())
}

/// Load a YAML file relative to `config_dir` with full tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir).load_file(file)
}
