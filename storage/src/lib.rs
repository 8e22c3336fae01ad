//! Probe result persistence.
//!
//! One row per probe outcome in a `results` table. Writes are independent:
//! each record is inserted and committed in its own transaction, so one bad
//! record never rolls back another.

mod secure;
mod sqlite;

use thiserror::Error;

use pulse_types::{Host, ProbeOutcome};

pub use rusqlite;
pub use sqlite::{SqliteResultStore, StoredResult};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create results table: {0}")]
    Schema(#[source] rusqlite::Error),
    #[error("failed to store result for {host}: {source}")]
    Write {
        host: Host,
        #[source]
        source: rusqlite::Error,
    },
    #[error("result for {host} is out of range: {reason}")]
    OutOfRange { host: Host, reason: String },
}

impl StorageError {
    /// Host of the record that failed, when the failure is per-record.
    #[must_use]
    pub fn host(&self) -> Option<&Host> {
        match self {
            Self::Schema(_) => None,
            Self::Write { host, .. } | Self::OutOfRange { host, .. } => Some(host),
        }
    }
}

/// Destination for probe outcomes.
pub trait ResultSink: Send {
    /// Create the results table if it is missing. Idempotent.
    fn ensure_schema(&mut self) -> Result<(), StorageError>;

    /// Insert and commit one outcome.
    fn insert(&mut self, outcome: &ProbeOutcome) -> Result<(), StorageError>;
}
