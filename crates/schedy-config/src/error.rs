//! Configuration errors

use std::path::PathBuf;

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no secret named '{key}' in secrets.yaml")]
    SecretNotFound { key: String },

    #[error("can't include '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    #[error("{path} includes itself")]
    CircularInclude { path: PathBuf },

    #[error("environment variable '{var}' is not set")]
    EnvVarNotFound { var: String },

    /// A value that parsed but doesn't make sense, keyed by its dotted path
    #[error("{key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}
