//! Database schema migrations.
//!
//! Applies the initial schema: authors, posts (with an external-content
//! FTS5 index), attachments, the embedding cache, and schema_migrations.

use rusqlite::Connection;
use tracing::info;

use fedibgs_core::error::FedibgsError;

use crate::db::NOW_MILLIS_SQL;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), FedibgsError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT ({})
        );",
        NOW_MILLIS_SQL
    ))
    .map_err(|e| FedibgsError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| FedibgsError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
///
/// Timestamps are epoch milliseconds. `posts.indexed_at` is assigned by the
/// store at insert time and is the live-stream cursor column.
fn apply_v1(conn: &Connection) -> Result<(), FedibgsError> {
    conn.execute_batch(&format!(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS authors (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            url         TEXT NOT NULL UNIQUE,
            username    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_authors_username
            ON authors (username);

        CREATE TABLE IF NOT EXISTS posts (
            id              TEXT PRIMARY KEY NOT NULL,
            content         TEXT NOT NULL DEFAULT '',
            text_embedding  BLOB,
            post_url        TEXT NOT NULL,
            tags            TEXT NOT NULL DEFAULT '[]',
            author_id       INTEGER NOT NULL REFERENCES authors(id),
            indexed_at      INTEGER NOT NULL DEFAULT ({now})
        );

        CREATE INDEX IF NOT EXISTS idx_posts_indexed_at
            ON posts (indexed_at);

        CREATE INDEX IF NOT EXISTS idx_posts_author
            ON posts (author_id, indexed_at DESC);

        CREATE TABLE IF NOT EXISTS attachments (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            url         TEXT NOT NULL,
            description TEXT,
            vector      BLOB,
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_post
            ON attachments (post_id);

        -- Lexical index over post content, English stemming.
        CREATE VIRTUAL TABLE IF NOT EXISTS posts_fts USING fts5(
            content,
            content = 'posts',
            content_rowid = 'rowid',
            tokenize = 'porter unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS posts_fts_insert AFTER INSERT ON posts BEGIN
            INSERT INTO posts_fts (rowid, content) VALUES (new.rowid, new.content);
        END;

        CREATE TRIGGER IF NOT EXISTS posts_fts_delete AFTER DELETE ON posts BEGIN
            INSERT INTO posts_fts (posts_fts, rowid, content)
                VALUES ('delete', old.rowid, old.content);
        END;

        CREATE TABLE IF NOT EXISTS embedding_cache (
            key         TEXT PRIMARY KEY NOT NULL,
            vector      BLOB NOT NULL,
            created_at  INTEGER NOT NULL DEFAULT ({now})
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');

        COMMIT;
        ",
        now = NOW_MILLIS_SQL
    ))
    .map_err(|e| FedibgsError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_post_insert_populates_fts() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO authors (url, username) VALUES ('https://x/@a', 'a')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO posts (id, content, post_url, author_id)
             VALUES ('p1', 'running through the forest', 'https://x/1', 1)",
            [],
        )
        .unwrap();

        // Porter stemming: "run" matches "running".
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM posts_fts WHERE posts_fts MATCH 'run'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);

        let indexed_at: i64 = conn
            .query_row("SELECT indexed_at FROM posts WHERE id = 'p1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(indexed_at > 1_600_000_000_000);
    }

    #[test]
    fn test_post_requires_existing_author() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO posts (id, content, post_url, author_id) VALUES ('p1', 'x', 'u', 42)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_author_url_unique() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute("INSERT INTO authors (url, username) VALUES ('u', 'a')", [])
            .unwrap();
        let result = conn.execute("INSERT INTO authors (url, username) VALUES ('u', 'b')", []);
        assert!(result.is_err());
    }
}
