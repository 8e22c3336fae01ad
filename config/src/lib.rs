//! Configuration loading, parsing, and persistence for Pulse.
//!
//! The on-disk format is TOML (`~/.pulse/config.toml` by default, or the path in
//! `PULSE_CONFIG`):
//!
//! ```toml
//! [auth]
//! token = "..."
//! email = "ops@example.com"
//! password = "${PULSE_PASSWORD}"
//!
//! [probe]
//! hosts = ["a.example.com", "b.example.com"]
//! lookback_days = 1
//! batch_size = 10
//! ```
//!
//! Runs only ever mutate the credential, so [`ConfigSink::save`] rewrites
//! `auth.token` in place and leaves the rest of the file (comments and
//! `${VAR}` references included) untouched.

mod env;
mod model;
mod paths;
mod store;

use std::path::PathBuf;

use thiserror::Error;

pub use env::expand_env_vars;
pub use model::{
    ApiConfig, AuthConfig, Config, DEFAULT_API_BASE_URL, DEFAULT_BATCH_SIZE, DEFAULT_FORWARDED_HOST,
    DEFAULT_LOOKBACK_DAYS, DEFAULT_TIMEOUT_SECS, DEFAULT_UTC_OFFSET, LoginCredentials,
    MAX_LOOKBACK_DAYS, ProbeConfig, Scheme, StorageConfig,
};
pub use paths::{DATA_DIR_NAME, data_dir, ensure_private_dir};
pub use store::{CONFIG_ENV_VAR, ConfigSink, FileConfigStore, config_path};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine config path (set {CONFIG_ENV_VAR})")]
    NoPath,
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to edit config at {}: {source}", path.display())]
    Edit {
        path: PathBuf,
        source: toml_edit::TomlError,
    },
    #[error("failed to write config at {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Edit { path, .. }
            | ConfigError::Write { path, .. } => Some(path),
            ConfigError::NoPath | ConfigError::Invalid(_) => None,
        }
    }
}
