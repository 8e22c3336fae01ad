use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};

use pulse_types::ProbeOutcome;

use crate::secure::prepare_db_path;
use crate::{ResultSink, StorageError};

/// A row read back from the `results` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResult {
    pub id: i64,
    pub host: String,
    pub timestamp: DateTime<Utc>,
    pub response_time: u64,
    pub status_code: u16,
}

/// SQLite-backed [`ResultSink`].
pub struct SqliteResultStore {
    db: Connection,
}

impl SqliteResultStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            host TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            response_time INTEGER NOT NULL CHECK (response_time >= 0),
            status_code INTEGER NOT NULL CHECK (status_code BETWEEN 0 AND 999)
        );

        CREATE INDEX IF NOT EXISTS idx_results_host_timestamp
        ON results(host, timestamp);
    ";

    /// Open or create the results database at `path`.
    ///
    /// The table itself is created by [`ResultSink::ensure_schema`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        prepare_db_path(path)?;

        let db = Connection::open(path)
            .with_context(|| format!("Failed to open results database at {}", path.display()))?;
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .context("Failed to set results database pragmas")?;
        Ok(Self { db })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory results store")?;
        Ok(Self { db })
    }

    /// Every stored row, oldest first.
    pub fn results(&self) -> Result<Vec<StoredResult>> {
        let mut stmt = self
            .db
            .prepare(
                "SELECT id, host, timestamp, response_time, status_code
                 FROM results
                 ORDER BY id ASC",
            )
            .context("Failed to prepare results query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .context("Failed to query results")?;

        let mut results = Vec::new();
        for row in rows {
            let (id, host, timestamp, response_time, status_code) =
                row.context("Failed to read result row")?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .with_context(|| format!("Invalid timestamp in row {id}: {timestamp}"))?
                .with_timezone(&Utc);
            results.push(StoredResult {
                id,
                host,
                timestamp,
                response_time: u64::try_from(response_time)
                    .with_context(|| format!("Negative response_time in row {id}"))?,
                status_code: u16::try_from(status_code)
                    .with_context(|| format!("Invalid status_code in row {id}"))?,
            });
        }
        Ok(results)
    }
}

impl ResultSink for SqliteResultStore {
    fn ensure_schema(&mut self) -> Result<(), StorageError> {
        self.db
            .execute_batch(Self::SCHEMA)
            .map_err(StorageError::Schema)
    }

    fn insert(&mut self, outcome: &ProbeOutcome) -> Result<(), StorageError> {
        let host = &outcome.host;
        let response_time =
            i64::try_from(outcome.latency_ms).map_err(|_| StorageError::OutOfRange {
                host: host.clone(),
                reason: format!("latency {} ms does not fit a row", outcome.latency_ms),
            })?;
        let write_err = |source| StorageError::Write {
            host: host.clone(),
            source,
        };

        // Dropping an uncommitted transaction rolls it back.
        let tx = self.db.transaction().map_err(write_err)?;
        tx.execute(
            "INSERT INTO results (host, timestamp, response_time, status_code)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                host.as_str(),
                outcome
                    .observed_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                response_time,
                outcome.status_code,
            ],
        )
        .map_err(write_err)?;
        tx.commit().map_err(write_err)?;

        tracing::debug!(%host, status = outcome.status_code, "Stored probe result");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pulse_types::Host;
    use std::time::Duration;
    use tempfile::TempDir;

    fn outcome(host: &str, status: u16, latency_ms: u64) -> ProbeOutcome {
        ProbeOutcome::new(
            Host::new(host).unwrap(),
            status,
            Duration::from_millis(latency_ms),
            Utc.with_ymd_and_hms(2024, 3, 10, 9, 15, 30).unwrap(),
        )
    }

    fn store() -> SqliteResultStore {
        let mut store = SqliteResultStore::open_in_memory().expect("open store");
        store.ensure_schema().expect("schema");
        store
    }

    #[test]
    fn insert_then_read_back() {
        let mut store = store();
        store.insert(&outcome("a.example.com", 200, 120)).unwrap();
        store.insert(&outcome("b.example.com", 0, 180_000)).unwrap();

        let rows = store.results().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].host, "a.example.com");
        assert_eq!(rows[0].status_code, 200);
        assert_eq!(rows[0].response_time, 120);
        assert_eq!(
            rows[0].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 10, 9, 15, 30).unwrap()
        );
        assert_eq!(rows[1].status_code, 0);
        assert!(rows[0].id < rows[1].id);
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let mut store = store();
        store.insert(&outcome("a.example.com", 200, 1)).unwrap();
        store.ensure_schema().unwrap();
        assert_eq!(store.results().unwrap().len(), 1);
    }

    #[test]
    fn insert_without_schema_fails() {
        let mut store = SqliteResultStore::open_in_memory().unwrap();
        let err = store.insert(&outcome("a.example.com", 200, 1)).unwrap_err();
        assert!(matches!(err, StorageError::Write { .. }));
        assert_eq!(err.host().map(Host::as_str), Some("a.example.com"));
    }

    #[test]
    fn failed_record_does_not_affect_later_records() {
        let mut store = store();
        store.insert(&outcome("a.example.com", 200, 5)).unwrap();
        let err = store
            .insert(&outcome("bad.example.com", 1000, 5))
            .unwrap_err();
        store.insert(&outcome("c.example.com", 503, 5)).unwrap();

        assert!(matches!(err, StorageError::Write { .. }));
        let hosts: Vec<String> = store.results().unwrap().into_iter().map(|r| r.host).collect();
        assert_eq!(hosts, vec!["a.example.com", "c.example.com"]);
    }

    #[test]
    fn oversized_latency_is_rejected() {
        let mut store = store();
        let mut record = outcome("a.example.com", 200, 0);
        record.latency_ms = u64::MAX;
        assert!(matches!(
            store.insert(&record),
            Err(StorageError::OutOfRange { .. })
        ));
        assert!(store.results().unwrap().is_empty());
    }

    #[test]
    fn open_creates_database_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("results.db");

        let mut store = SqliteResultStore::open(&path).unwrap();
        store.ensure_schema().unwrap();
        store.insert(&outcome("a.example.com", 200, 1)).unwrap();
        drop(store);

        assert!(path.exists());
        let reopened = SqliteResultStore::open(&path).unwrap();
        assert_eq!(reopened.results().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn open_keeps_existing_directory_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("shared");
        std::fs::create_dir(&parent).unwrap();
        std::fs::set_permissions(&parent, std::fs::Permissions::from_mode(0o755)).unwrap();

        SqliteResultStore::open(parent.join("results.db")).unwrap();

        let mode = std::fs::metadata(&parent).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn open_creates_owner_only_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("fresh");

        SqliteResultStore::open(parent.join("results.db")).unwrap();

        let mode = std::fs::metadata(&parent).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn open_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.db");
        SqliteResultStore::open(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
