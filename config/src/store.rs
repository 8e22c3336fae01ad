use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use toml_edit::DocumentMut;

use crate::paths::{data_dir, ensure_private_dir};
use crate::{Config, ConfigError};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV_VAR: &str = "PULSE_CONFIG";

/// Where configuration is loaded from and where a refreshed credential is
/// persisted to.
///
/// `save` must complete before it returns; callers rely on the new credential
/// being durable before probing starts.
pub trait ConfigSink: Send + Sync {
    fn load(&self) -> Result<Config, ConfigError>;

    fn save(&self, config: &Config) -> Result<(), ConfigError>;
}

/// Default config location: `$PULSE_CONFIG`, else `~/.pulse/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    data_dir().map(|dir| dir.join("config.toml"))
}

/// TOML file backed [`ConfigSink`].
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location (see [`config_path`]).
    pub fn from_env() -> Result<Self, ConfigError> {
        config_path().map(Self::new).ok_or(ConfigError::NoPath)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSink for FileConfigStore {
    fn load(&self) -> Result<Config, ConfigError> {
        let path = self.path.clone();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        let config: Config = match toml::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                return Err(ConfigError::Parse { path, source: err });
            }
        };

        config.finish()
    }

    /// Persist the credential to the config file.
    ///
    /// Uses `toml_edit` to preserve comments and formatting. Creates the
    /// config file and parent directory if they don't exist.
    fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let path = &self.path;
        let write_err = |source: io::Error| ConfigError::Write {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            ensure_private_dir(parent).map_err(write_err)?;
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                });
            }
        };

        let mut doc = content
            .parse::<DocumentMut>()
            .map_err(|source| ConfigError::Edit {
                path: path.clone(),
                source,
            })?;

        if !doc.contains_key("auth") {
            doc["auth"] = toml_edit::Item::Table(toml_edit::Table::new());
        }
        doc["auth"]["token"] = toml_edit::value(config.auth.token.as_str());

        atomic_write(path, doc.to_string().as_bytes()).map_err(write_err)?;
        tracing::info!(path = %path.display(), "Config updated with refreshed token");
        Ok(())
    }
}

/// Temp file + rename so a crash mid-write never truncates the config.
fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
    }

    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
