//! Reading Storage Module
//!
//! Rolling 24-hour glucose store on SQLite. Every operation takes the same
//! connection lock, so a shutdown reader on another thread never interleaves
//! with the acquisition loop's writes.

mod migrations;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, SecondsFormat, Timelike, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, error, info, warn};

use migrations::run_migrations;

/// Length of the rolling window
pub const WINDOW_HOURS: i64 = 24;

/// One glucose measurement (mmol/L) at a UTC instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Reading {
    /// Timestamps are kept at second precision; sub-second parts are dropped.
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        Self { timestamp, value }
    }
}

/// Earliest instant still inside the window ending at `now`
pub fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(WINDOW_HOURS)
}

// Fixed-width UTC text, so SQL string comparison is chronological.
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Timestamp(format!("invalid timestamp '{}': {}", value, e)))
}

/// Durable, deduplicated store of readings
pub struct ReadingStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl ReadingStore {
    /// Open (or create) the store at `path` and bring its schema up to date
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Io(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let mut conn = Connection::open(path)?;

        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            error!("Failed to enable WAL mode: {}", e);
        }

        run_migrations(&mut conn)?;

        info!("Reading store initialized at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert readings, ignoring timestamps that are already stored.
    ///
    /// Each row stands alone: a failed insert is logged with its reading and
    /// the rest of the batch still goes in. Returns the number of new rows.
    pub fn add(&self, readings: &[Reading]) -> Result<usize, StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        for reading in readings {
            let timestamp = format_timestamp(&reading.timestamp);
            match tx.execute(
                "INSERT OR IGNORE INTO glucose (timestamp, glucose) VALUES (?1, ?2)",
                params![timestamp, reading.value],
            ) {
                Ok(0) => debug!("Duplicate reading ignored: {} {}", timestamp, reading.value),
                Ok(n) => inserted += n,
                Err(e) => error!("Insert error {} for {} {}", e, timestamp, reading.value),
            }
        }

        tx.commit()?;
        debug!("Stored {} of {} readings", inserted, readings.len());
        Ok(inserted)
    }

    /// Readings of the last 24 hours, oldest first
    pub fn window_24h(&self) -> Result<Vec<Reading>, StorageError> {
        self.window_at(Utc::now())
    }

    /// Readings with `timestamp >= now - 24h`, oldest first
    pub fn window_at(&self, now: DateTime<Utc>) -> Result<Vec<Reading>, StorageError> {
        let cutoff = window_start(now);
        let conn = self.lock();

        let mut stmt = conn.prepare(
            "SELECT timestamp, glucose FROM glucose
             WHERE timestamp >= ?1
             ORDER BY timestamp ASC",
        )?;

        let rows = stmt.query_map(params![format_timestamp(&cutoff)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut readings = Vec::new();
        for row in rows {
            let (raw_timestamp, value) = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping unreadable row: {}", e);
                    continue;
                }
            };
            match parse_timestamp(&raw_timestamp) {
                Ok(timestamp) if timestamp >= cutoff => readings.push(Reading { timestamp, value }),
                Ok(_) => {}
                Err(e) => warn!("Skipping stored reading: {}", e),
            }
        }

        Ok(readings)
    }

    /// Delete readings older than 24 hours
    pub fn prune(&self) -> Result<usize, StorageError> {
        self.prune_at(Utc::now())
    }

    /// Delete readings with `timestamp < now - 24h`
    pub fn prune_at(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let cutoff = format_timestamp(&window_start(now));
        let conn = self.lock();

        let deleted = conn.execute("DELETE FROM glucose WHERE timestamp < ?1", params![cutoff])?;
        if deleted > 0 {
            debug!("Pruned {} readings older than {}", deleted, cutoff);
        }
        Ok(deleted)
    }

    /// Rows physically present, stale ones included
    pub fn count(&self) -> Result<usize, StorageError> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM glucose", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Timestamp error: {0}")]
    Timestamp(String),

    #[error("Schema error: {0}")]
    Schema(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn open_temp() -> (TempDir, ReadingStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = ReadingStore::open(&temp_dir.path().join("glucose.db")).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_store_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("glucose.db");

        let store = ReadingStore::open(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(store.path(), db_path.as_path());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_timestamp_keeps_first_value() {
        let (_dir, store) = open_temp();
        let at = noon() - Duration::minutes(10);

        assert_eq!(store.add(&[Reading::new(at, 6.0)]).unwrap(), 1);
        assert_eq!(store.add(&[Reading::new(at, 9.9)]).unwrap(), 0);

        let window = store.window_at(noon()).unwrap();
        assert_eq!(window, vec![Reading::new(at, 6.0)]);
    }

    #[test]
    fn test_duplicates_within_one_batch() {
        let (_dir, store) = open_temp();
        let at = noon() - Duration::minutes(5);
        let later = noon() - Duration::minutes(1);

        let inserted = store
            .add(&[Reading::new(at, 5.0), Reading::new(at, 5.5), Reading::new(later, 5.2)])
            .unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_subsecond_timestamps_collapse() {
        let (_dir, store) = open_temp();
        let at = noon() - Duration::minutes(3);

        store.add(&[Reading::new(at + Duration::milliseconds(250), 7.0)]).unwrap();
        store.add(&[Reading::new(at, 7.5)]).unwrap();

        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_window_is_ascending_and_bounded() {
        let (_dir, store) = open_temp();
        let stale = noon() - Duration::hours(25);
        let edge = noon() - Duration::hours(24);
        let recent = noon() - Duration::minutes(5);
        let middle = noon() - Duration::hours(3);

        store
            .add(&[
                Reading::new(recent, 8.0),
                Reading::new(stale, 4.0),
                Reading::new(middle, 6.0),
                Reading::new(edge, 5.0),
            ])
            .unwrap();

        let window = store.window_at(noon()).unwrap();
        let timestamps: Vec<_> = window.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![edge, middle, recent]);
        assert!(window.iter().all(|r| r.timestamp >= window_start(noon())));
    }

    #[test]
    fn test_prune_removes_stale_rows() {
        let (_dir, store) = open_temp();
        store
            .add(&[
                Reading::new(noon() - Duration::hours(30), 4.0),
                Reading::new(noon() - Duration::hours(24) - Duration::seconds(1), 4.5),
                Reading::new(noon() - Duration::hours(1), 6.0),
            ])
            .unwrap();

        assert_eq!(store.prune_at(noon()).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.prune_at(noon()).unwrap(), 0);
    }

    #[test]
    fn test_window_skips_corrupt_rows() {
        let (_dir, store) = open_temp();
        store.add(&[Reading::new(noon() - Duration::minutes(2), 6.6)]).unwrap();
        store
            .lock()
            .execute(
                "INSERT INTO glucose (timestamp, glucose) VALUES ('9999-garbage', 1.0)",
                [],
            )
            .unwrap();

        let window = store.window_at(noon()).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].value, 6.6);
    }

    #[test]
    fn test_readings_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("glucose.db");
        let at = Utc::now() - Duration::minutes(5);

        {
            let store = ReadingStore::open(&db_path).unwrap();
            store.add(&[Reading::new(at, 6.4)]).unwrap();
        }

        let store = ReadingStore::open(&db_path).unwrap();
        assert_eq!(store.window_24h().unwrap(), vec![Reading::new(at, 6.4)]);
    }

    #[test]
    fn test_concurrent_reader() {
        let (_dir, store) = open_temp();
        let store = Arc::new(store);
        let base = Utc::now() - Duration::hours(2);

        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    let window = store.window_24h().unwrap();
                    assert!(window.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
                }
            })
        };

        for i in 0..50 {
            let reading = Reading::new(base + Duration::minutes(i), 5.0 + i as f64 / 10.0);
            store.add(&[reading]).unwrap();
        }

        reader.join().unwrap();
        assert_eq!(store.window_24h().unwrap().len(), 50);
    }
}
