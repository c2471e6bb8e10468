//! SQLite activity log: WAL-mode table for structured event storage and querying.
//!
//! Uses Write-Ahead Logging for concurrent readers, cached prepared statements
//! for insert throughput, and never blocks the guard when a write fails.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{GuardError, Result};

/// SQLite activity logger.
pub struct SqliteLogger {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLogger {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| GuardError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a row into `activity_log`.
    pub fn log_activity(&self, row: &ActivityRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO activity_log (
                timestamp, event_type, severity, entry_key, size_bytes, tier,
                step, pressure_level, usage_pct, duration_ms,
                success, error_code, error_message, details
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            )?
            .execute(params![
                row.timestamp,
                row.event_type,
                row.severity,
                row.entry_key,
                row.size_bytes,
                row.tier,
                row.step,
                row.pressure_level,
                row.usage_pct,
                row.duration_ms,
                row.success,
                row.error_code,
                row.error_message,
                row.details,
            ])?;
        Ok(())
    }

    /// Recent activity entries, newest first.
    pub fn recent_activity(&self, limit: u32) -> Result<Vec<ActivityRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, event_type, severity, entry_key, size_bytes, tier,
                    step, pressure_level, usage_pct, duration_ms,
                    success, error_code, error_message, details
             FROM activity_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(ActivityRow {
                    timestamp: row.get(0)?,
                    event_type: row.get(1)?,
                    severity: row.get(2)?,
                    entry_key: row.get(3)?,
                    size_bytes: row.get(4)?,
                    tier: row.get(5)?,
                    step: row.get(6)?,
                    pressure_level: row.get(7)?,
                    usage_pct: row.get(8)?,
                    duration_ms: row.get(9)?,
                    success: row.get(10)?,
                    error_code: row.get(11)?,
                    error_message: row.get(12)?,
                    details: row.get(13)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete rows older than `retention_days`. Returns rows deleted.
    pub fn prune_activity_log(&self, retention_days: u32) -> Result<usize> {
        let Some(cutoff) = chrono::Utc::now()
            .checked_sub_signed(chrono::Duration::days(i64::from(retention_days)))
        else {
            return Ok(0);
        };
        let cutoff_str = cutoff.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let deleted = self.conn.execute(
            "DELETE FROM activity_log WHERE timestamp < ?1",
            params![cutoff_str],
        )?;
        Ok(deleted)
    }

    /// Count entries of `event_type` since an RFC 3339 timestamp.
    pub fn count_events_since(&self, event_type: &str, since: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM activity_log WHERE event_type = ?1 AND timestamp >= ?2",
            params![event_type, since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Sum of `size_bytes` of successful `event_type` rows since a timestamp.
    pub fn bytes_freed_since(&self, event_type: &str, since: &str) -> Result<i64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM activity_log
             WHERE event_type = ?1 AND timestamp >= ?2 AND success = 1",
            params![event_type, since],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    #[must_use]
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

/// Row for the `activity_log` table.
#[derive(Debug, Clone, Default)]
pub struct ActivityRow {
    pub timestamp: String,
    pub event_type: String,
    pub severity: String,
    pub entry_key: Option<String>,
    pub size_bytes: Option<i64>,
    pub tier: Option<String>,
    pub step: Option<String>,
    pub pressure_level: Option<String>,
    pub usage_pct: Option<f64>,
    pub duration_ms: Option<i64>,
    pub success: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[STG-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            entry_key TEXT,
            size_bytes INTEGER,
            tier TEXT,
            step TEXT,
            pressure_level TEXT,
            usage_pct REAL,
            duration_ms INTEGER,
            success INTEGER NOT NULL DEFAULT 1,
            error_code TEXT,
            error_message TEXT,
            details TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_activity_type_time ON activity_log(event_type, timestamp);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, SqliteLogger) {
        let dir = tempfile::tempdir().unwrap();
        let logger = SqliteLogger::open(&dir.path().join("activity.db")).unwrap();
        (dir, logger)
    }

    fn removal(ts: &str, key: &str, size: i64) -> ActivityRow {
        ActivityRow {
            timestamp: ts.to_string(),
            event_type: "entry_remove".to_string(),
            severity: "info".to_string(),
            entry_key: Some(key.to_string()),
            size_bytes: Some(size),
            tier: Some("emergency".to_string()),
            step: Some("purge_media".to_string()),
            success: 1,
            ..ActivityRow::default()
        }
    }

    #[test]
    fn schema_created_and_wal_active() {
        let (_dir, logger) = temp_db();
        assert!(logger.is_wal_mode());
    }

    #[test]
    fn insert_and_query_activity() {
        let (_dir, logger) = temp_db();
        logger
            .log_activity(&removal("2026-10-01T12:00:00Z", "image_1", 40_000))
            .unwrap();

        let results = logger.recent_activity(10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry_key.as_deref(), Some("image_1"));
        assert_eq!(results[0].step.as_deref(), Some("purge_media"));
        assert_eq!(results[0].size_bytes, Some(40_000));
    }

    #[test]
    fn aggregate_counts() {
        let (_dir, logger) = temp_db();
        for i in 0..5 {
            logger
                .log_activity(&removal(
                    &format!("2026-10-01T12:0{i}:00Z"),
                    &format!("cache_{i}"),
                    1000 * i64::from(i + 1),
                ))
                .unwrap();
        }
        let mut failed = removal("2026-10-01T12:09:00Z", "cache_x", 99_999);
        failed.success = 0;
        logger.log_activity(&failed).unwrap();

        let since = "2026-10-01T00:00:00Z";
        assert_eq!(logger.count_events_since("entry_remove", since).unwrap(), 6);
        assert_eq!(logger.bytes_freed_since("entry_remove", since).unwrap(), 15_000);
        assert_eq!(logger.count_events_since("entry_remove", "2026-11-01T00:00:00Z").unwrap(), 0);
    }

    #[test]
    fn prune_drops_old_rows() {
        let (_dir, logger) = temp_db();
        logger
            .log_activity(&removal("2001-01-01T00:00:00.000Z", "old", 1))
            .unwrap();
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        logger.log_activity(&removal(&now, "new", 1)).unwrap();
        assert_eq!(logger.prune_activity_log(30).unwrap(), 1);
        assert_eq!(logger.recent_activity(10).unwrap().len(), 1);
    }

    #[test]
    fn prune_with_unbounded_window_keeps_everything() {
        let (_dir, logger) = temp_db();
        logger
            .log_activity(&removal("2001-01-01T00:00:00.000Z", "old", 1))
            .unwrap();
        assert_eq!(logger.prune_activity_log(u32::MAX).unwrap(), 0);
        assert_eq!(logger.recent_activity(10).unwrap().len(), 1);
    }

    #[test]
    fn idempotent_schema_creation() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("idempotent.db");
        let _ = SqliteLogger::open(&db_path).unwrap();
        let logger = SqliteLogger::open(&db_path).unwrap();
        assert!(logger.is_wal_mode());
    }
}
