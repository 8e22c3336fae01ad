use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Deserializer};
use url::Url;

use pulse_types::{Credential, Host};

use crate::{ConfigError, data_dir, expand_env_vars};

/// Central API serving the auth and sign-in endpoints.
pub const DEFAULT_API_BASE_URL: &str = "https://api.rpcm.cloud";
/// Origin sent in `X-Forwarded-Host` on every probe.
pub const DEFAULT_FORWARDED_HOST: &str = "api.rpcm.cloud";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_LOOKBACK_DAYS: u32 = 1;
pub const DEFAULT_UTC_OFFSET: &str = "+03:00";
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Parse TOML, expand `${VAR}` references in `[auth]`, and validate.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.finish()
    }

    pub(crate) fn finish(mut self) -> Result<Self, ConfigError> {
        self.auth.expand_env();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "probe.batch_size must be at least 1".to_string(),
            ));
        }
        if self.probe.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "probe.timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.probe.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(ConfigError::Invalid(format!(
                "probe.lookback_days must be at most {MAX_LOOKBACK_DAYS}"
            )));
        }
        if !matches!(self.api.base_url.scheme(), "http" | "https")
            || self.api.base_url.host_str().is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "api.base_url must be an http(s) URL with a host, got {}",
                self.api.base_url
            )));
        }
        Ok(())
    }

    /// The stored bearer token. May be empty or stale.
    #[must_use]
    pub fn credential(&self) -> Credential {
        Credential::new(self.auth.token.clone())
    }

    /// Sign-in credentials, when both email and password are configured.
    #[must_use]
    pub fn login(&self) -> Option<LoginCredentials> {
        let email = self.auth.email.as_deref()?.trim();
        let password = self.auth.password.as_deref()?;
        if email.is_empty() || password.is_empty() {
            return None;
        }
        Some(LoginCredentials {
            email: email.to_string(),
            password: password.to_string(),
        })
    }

    /// A copy of this config carrying a replacement credential.
    #[must_use]
    pub fn with_credential(&self, credential: &Credential) -> Self {
        let mut updated = self.clone();
        updated.auth.token = credential.as_str().to_string();
        updated
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Bearer token from the last successful sign-in.
    #[serde(default)]
    pub token: String,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    fn expand_env(&mut self) {
        self.token = expand_env_vars(&self.token);
        if let Some(email) = self.email.as_mut() {
            *email = expand_env_vars(email);
        }
        if let Some(password) = self.password.as_mut() {
            *password = expand_env_vars(password);
        }
    }
}

// Manual Debug impl to prevent leaking secrets in logs.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mask(set: bool) -> &'static str {
            if set { "[REDACTED]" } else { "None" }
        }
        f.debug_struct("AuthConfig")
            .field("token", &mask(!self.token.is_empty()))
            .field("email", &self.email)
            .field("password", &mask(self.password.is_some()))
            .finish()
    }
}

/// Email/password pair for the sign-in exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Central API endpoints.
///
/// ```toml
/// [api]
/// base_url = "https://api.rpcm.cloud"
/// forwarded_host = "api.rpcm.cloud"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    pub forwarded_host: Option<String>,
}

impl ApiConfig {
    #[must_use]
    pub fn forwarded_host(&self) -> String {
        self.forwarded_host
            .clone()
            .unwrap_or_else(|| DEFAULT_FORWARDED_HOST.to_string())
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            forwarded_host: None,
        }
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_API_BASE_URL).expect("default API base URL is valid")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl Scheme {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Probe fleet and scheduling knobs.
///
/// ```toml
/// [probe]
/// hosts = ["a.example.com"]
/// lookback_days = 1
/// batch_size = 10
/// timeout_seconds = 180
/// scheme = "https"
/// utc_offset = "+03:00"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub scheme: Scheme,
    /// Offset the lookback window timestamps are rendered in.
    #[serde(default = "default_utc_offset", deserialize_with = "deserialize_offset")]
    pub utc_offset: FixedOffset,
}

impl ProbeConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[must_use]
    pub fn batch_size(&self) -> NonZeroUsize {
        // Zero is rejected by validation.
        NonZeroUsize::new(self.batch_size).unwrap_or(NonZeroUsize::MIN)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            scheme: Scheme::default(),
            utc_offset: default_utc_offset(),
        }
    }
}

const fn default_lookback_days() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}

const fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

const fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_utc_offset() -> FixedOffset {
    DEFAULT_UTC_OFFSET
        .parse()
        .expect("default UTC offset is valid")
}

fn deserialize_offset<'de, D>(deserializer: D) -> Result<FixedOffset, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim().parse::<FixedOffset>().map_err(|e| {
        serde::de::Error::custom(format!(
            "invalid utc_offset {raw:?} (expected e.g. \"+03:00\"): {e}"
        ))
    })
}

/// Result database location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// SQLite file path. `~` expands to the home directory.
    pub path: Option<String>,
}

impl StorageConfig {
    /// Resolved database path, defaulting to `~/.pulse/results.db`.
    #[must_use]
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match self.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => {
                let raw = expand_env_vars(raw);
                if let Some(rest) = raw.strip_prefix("~/") {
                    dirs::home_dir().map(|home| home.join(rest))
                } else {
                    Some(PathBuf::from(raw))
                }
            }
            None => data_dir().map(|dir| dir.join("results.db")),
        }
    }
}
