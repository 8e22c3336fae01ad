//! Core domain types for Pulse.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

// ============================================================================
// Host
// ============================================================================

/// A probe target: a hostname, optionally with a `:port` suffix.
///
/// Surrounding whitespace is trimmed; empty names are rejected, as is anything
/// that would not parse as the authority of a URL on its own (a scheme, path,
/// query, fragment, or userinfo).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Host(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("host must not be empty")]
    Empty,
    #[error("host {0:?} must be a bare hostname with an optional port")]
    Malformed(String),
}

impl Host {
    pub fn new(value: impl Into<String>) -> Result<Self, HostError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(HostError::Empty);
        }
        if trimmed.contains(char::is_whitespace)
            || trimmed.contains('/')
            || !is_authority(trimmed)
        {
            return Err(HostError::Malformed(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `host[:port]` and nothing else once placed after `http://`.
fn is_authority(value: &str) -> bool {
    Url::parse(&format!("http://{value}")).is_ok_and(|url| {
        url.host_str().is_some()
            && url.path() == "/"
            && url.query().is_none()
            && url.fragment().is_none()
            && url.username().is_empty()
            && url.password().is_none()
    })
}

impl TryFrom<String> for Host {
    type Error = HostError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Host {
    type Error = HostError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Host> for String {
    fn from(value: Host) -> Self {
        value.0
    }
}

impl AsRef<str> for Host {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Credential
// ============================================================================

/// Opaque bearer token used against the auth and telemetry endpoints.
///
/// Debug output is redacted to prevent credential disclosure in logs or
/// error messages. Validity is unknown until the token manager checks it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Value for an `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "Credential(<empty>)")
        } else {
            write!(f, "Credential(<redacted>)")
        }
    }
}

// ============================================================================
// Probe results
// ============================================================================

/// Status code recorded when a host produced no HTTP response.
pub const NO_RESPONSE: u16 = 0;

/// The recorded result of probing one host once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub host: Host,
    /// HTTP status, or [`NO_RESPONSE`] for timeouts and transport failures.
    pub status_code: u16,
    pub latency_ms: u64,
    pub observed_at: DateTime<Utc>,
}

impl ProbeOutcome {
    #[must_use]
    pub fn new(host: Host, status_code: u16, latency: Duration, observed_at: DateTime<Utc>) -> Self {
        Self {
            host,
            status_code,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            observed_at,
        }
    }

    #[must_use]
    pub fn responded(&self) -> bool {
        self.status_code != NO_RESPONSE
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// All outcomes of one run, keyed by host.
///
/// Iteration is ordered by host name so aggregation is deterministic
/// regardless of the order in which concurrent probes complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet(BTreeMap<Host, ProbeOutcome>);

impl ResultSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an outcome, replacing any previous outcome for the same host.
    pub fn insert(&mut self, outcome: ProbeOutcome) -> Option<ProbeOutcome> {
        self.0.insert(outcome.host.clone(), outcome)
    }

    /// Merge a batch of outcomes into the set.
    pub fn merge(&mut self, batch: impl IntoIterator<Item = ProbeOutcome>) {
        for outcome in batch {
            self.insert(outcome);
        }
    }

    #[must_use]
    pub fn get(&self, host: &Host) -> Option<&ProbeOutcome> {
        self.0.get(host)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeOutcome> {
        self.0.values()
    }

    /// Number of outcomes with a 2xx status.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.iter().filter(|outcome| outcome.is_success()).count()
    }
}

impl IntoIterator for ResultSet {
    type Item = ProbeOutcome;
    type IntoIter = btree_map::IntoValues<Host, ProbeOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

impl FromIterator<ProbeOutcome> for ResultSet {
    fn from_iter<I: IntoIterator<Item = ProbeOutcome>>(iter: I) -> Self {
        let mut set = Self::new();
        set.merge(iter);
        set
    }
}
