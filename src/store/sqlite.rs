//! SQLite-backed adapters: one table per store in a single WAL-mode database.
//!
//! This is the shape most mobile key-value stores take under the hood, so
//! `SQLITE_FULL` is the canonical "store full" signal. A page budget
//! (`PRAGMA max_page_count`) turns the file into a fixed-capacity store.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, params};

use super::{KvStore, SecureStore, StoreError, StoreErrorKind, StoreResult};
use crate::core::errors::{GuardError, Result};

const PRIMARY_TABLE: &str = "kv_entries";
const SECURE_TABLE: &str = "secure_entries";

/// One key/value table on its own connection.
struct KvTable {
    conn: Connection,
    table: &'static str,
    path: PathBuf,
}

impl KvTable {
    fn open(path: &Path, table: &'static str, max_pages: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| GuardError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        if let Some(pages) = max_pages {
            conn.pragma_update(None, "max_page_count", pages)?;
        }
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            );"
        ))?;

        Ok(Self {
            conn,
            table,
            path: path.to_path_buf(),
        })
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT key FROM {} ORDER BY key", self.table))
            .map_err(map_sqlite_error)?;
        stmt.query_map([], |row| row.get(0))
            .map_err(map_sqlite_error)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(map_sqlite_error)
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.conn
            .prepare_cached(&format!("SELECT value FROM {} WHERE key = ?1", self.table))
            .map_err(map_sqlite_error)?
            .query_row(params![key], |row| row.get(0))
            .optional()
            .map_err(map_sqlite_error)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn
            .prepare_cached(&format!(
                "INSERT INTO {} (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                self.table
            ))
            .map_err(map_sqlite_error)?
            .execute(params![key, value])
            .map_err(map_sqlite_error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.conn
            .prepare_cached(&format!("DELETE FROM {} WHERE key = ?1", self.table))
            .map_err(map_sqlite_error)?
            .execute(params![key])
            .map_err(map_sqlite_error)?;
        Ok(())
    }
}

/// Persistent store backed by the `kv_entries` table.
pub struct SqliteStore {
    inner: KvTable,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            inner: KvTable::open(path, PRIMARY_TABLE, None)?,
        })
    }

    /// Open with a hard page budget; writes beyond it fail with `SQLITE_FULL`.
    pub fn open_with_max_pages(path: &Path, max_pages: u64) -> Result<Self> {
        Ok(Self {
            inner: KvTable::open(path, PRIMARY_TABLE, Some(max_pages))?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl KvStore for SqliteStore {
    fn all_keys(&self) -> StoreResult<Vec<String>> {
        self.inner.keys()
    }

    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key)
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.set(key, value)
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        self.inner.remove(key)
    }

    fn multi_remove(&self, keys: &[String]) -> StoreResult<()> {
        self.inner
            .conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(map_sqlite_error)?;
        for key in keys {
            if let Err(err) = self.inner.remove(key) {
                let _ = self.inner.conn.execute_batch("ROLLBACK");
                return Err(err);
            }
        }
        self.inner
            .conn
            .execute_batch("COMMIT")
            .map_err(map_sqlite_error)
    }
}

/// Secure store backed by the `secure_entries` table of the same file.
pub struct SqliteSecureStore {
    inner: KvTable,
}

impl SqliteSecureStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            inner: KvTable::open(path, SECURE_TABLE, None)?,
        })
    }

    /// Every key in the secure table (for reports; the trait does not enumerate).
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        self.inner.keys()
    }
}

impl SecureStore for SqliteSecureStore {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key)
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.set(key, value)
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        self.inner.remove(key)
    }
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

/// Translate rusqlite failures into typed store errors.
fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(ffi, _) => {
            let kind = match ffi.code {
                ErrorCode::DiskFull => StoreErrorKind::Full,
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => StoreErrorKind::Corrupt,
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::ReadOnly => StoreErrorKind::Unavailable,
                _ => StoreErrorKind::Unclassified,
            };
            StoreError::new(kind, err.to_string()).with_code(ffi.extended_code)
        }
        rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..) => {
            StoreError::new(StoreErrorKind::Corrupt, err.to_string())
        }
        _ => StoreError::unclassified(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::is_store_full;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("kv.sqlite3")).unwrap();
        (dir, store)
    }

    #[test]
    fn set_get_overwrite_remove() {
        let (_dir, store) = temp_store();
        store.set_item("meal_1", "{}").unwrap();
        store.set_item("meal_1", "{\"a\":1}").unwrap();
        assert_eq!(store.get_item("meal_1").unwrap().as_deref(), Some("{\"a\":1}"));
        store.remove_item("meal_1").unwrap();
        assert_eq!(store.get_item("meal_1").unwrap(), None);
        store.remove_item("meal_1").unwrap();
    }

    #[test]
    fn keys_are_sorted() {
        let (_dir, store) = temp_store();
        for key in ["b", "a", "c"] {
            store.set_item(key, "v").unwrap();
        }
        assert_eq!(store.all_keys().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn multi_remove_is_atomic_batch() {
        let (_dir, store) = temp_store();
        for key in ["temp_1", "temp_2", "keep"] {
            store.set_item(key, "v").unwrap();
        }
        store
            .multi_remove(&["temp_1".to_string(), "temp_2".to_string()])
            .unwrap();
        assert_eq!(store.all_keys().unwrap(), vec!["keep"]);
    }

    #[test]
    fn page_budget_surfaces_typed_full_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_with_max_pages(&dir.path().join("tiny.sqlite3"), 8).unwrap();
        let big = "x".repeat(256 * 1024);
        let err = store.set_item("image_big", &big).unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Full);
        assert!(is_store_full(&store, &err));
    }

    #[test]
    fn secure_table_is_separate_from_primary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.sqlite3");
        let primary = SqliteStore::open(&path).unwrap();
        let secure = SqliteSecureStore::open(&path).unwrap();
        primary.set_item("user_data", "plain").unwrap();
        secure.set_item("user_data", "secret").unwrap();
        assert_eq!(primary.get_item("user_data").unwrap().as_deref(), Some("plain"));
        assert_eq!(secure.get_item("user_data").unwrap().as_deref(), Some("secret"));
        assert_eq!(secure.keys().unwrap(), vec!["user_data"]);
    }
}
