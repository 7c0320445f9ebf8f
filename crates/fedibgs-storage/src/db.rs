//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, ErrorCode};
use tracing::info;

use fedibgs_core::error::FedibgsError;

use crate::migrations;

/// Milliseconds since the Unix epoch, evaluated by SQLite.
pub(crate) const NOW_MILLIS_SQL: &str =
    "CAST(ROUND((julianday('now') - 2440587.5) * 86400000.0) AS INTEGER)";

/// Thread-safe SQLite database wrapper.
///
/// Uses WAL mode and a busy timeout so that several consumer processes can
/// write to the same file; within one process the Mutex serializes access
/// since rusqlite Connection is not Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, a busy
    /// timeout, and runs all pending migrations.
    pub fn new(path: &Path) -> Result<Self, FedibgsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| FedibgsError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA cache_size = -65536;",
        )
        .map_err(|e| FedibgsError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, FedibgsError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FedibgsError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| FedibgsError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, FedibgsError>
    where
        F: FnOnce(&Connection) -> Result<T, FedibgsError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| FedibgsError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// The store's current time in epoch milliseconds.
    ///
    /// Live-stream cursors are advanced with this value so that they are
    /// compared against `indexed_at` on the same clock that assigned it.
    pub fn now_millis(&self) -> Result<i64, FedibgsError> {
        self.with_conn(|conn| {
            conn.query_row(&format!("SELECT {}", NOW_MILLIS_SQL), [], |row| row.get(0))
                .map_err(storage_err)
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Map a rusqlite error, classifying unique and primary-key violations as
/// [`FedibgsError::ConstraintViolation`].
pub fn storage_err(err: rusqlite::Error) -> FedibgsError {
    if is_unique_violation(&err) {
        return FedibgsError::ConstraintViolation(err.to_string());
    }
    FedibgsError::Storage(err.to_string())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
                .map_err(storage_err)?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::new(&path).unwrap();

        db.with_conn(|conn| {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(storage_err)?;
            assert_eq!(mode, "wal");
            Ok(())
        })
        .unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_now_millis_tracks_wall_clock() {
        let db = Database::in_memory().unwrap();
        let store_now = db.now_millis().unwrap();
        let local_now = chrono::Utc::now().timestamp_millis();
        assert!((store_now - local_now).abs() < 5_000);
    }

    #[test]
    fn test_unique_violation_is_classified() {
        let db = Database::in_memory().unwrap();
        let err = db
            .with_conn(|conn| {
                conn.execute("INSERT INTO authors (url, username) VALUES ('u', 'a')", [])
                    .map_err(storage_err)?;
                conn.execute("INSERT INTO authors (url, username) VALUES ('u', 'b')", [])
                    .map_err(storage_err)?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, FedibgsError::ConstraintViolation(_)));
    }

    #[test]
    fn test_foreign_key_violation_is_not_a_duplicate() {
        let db = Database::in_memory().unwrap();
        let err = db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO posts (id, content, post_url, author_id) VALUES ('p', 'x', 'u', 999)",
                    [],
                )
                .map_err(storage_err)?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, FedibgsError::Storage(_)));
    }
}
