//! Repository implementations for SQLite-backed persistence.
//!
//! Provides AuthorRepository and PostRepository, operating on the Database
//! struct using raw SQL. Posts are written together with their attachments
//! in one transaction per record.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use fedibgs_core::error::FedibgsError;
use fedibgs_core::types::{Author, AuthorRef, NewAttachment, NewPost, PersistOutcome, Post};

use crate::codec::{decode_vector, encode_vector};
use crate::db::{storage_err, Database};

/// Repository for authors. Rows are append-only.
pub struct AuthorRepository {
    db: Arc<Database>,
}

impl AuthorRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Find an author by profile URL.
    pub fn find_by_url(&self, url: &str) -> Result<Option<Author>, FedibgsError> {
        self.db.with_conn(|conn| find_author_by_url(conn, url))
    }

    /// Find an author by store id.
    pub fn find_by_id(&self, id: i64) -> Result<Option<Author>, FedibgsError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, url, username FROM authors WHERE id = ?1",
                rusqlite::params![id],
                row_to_author,
            )
            .optional()
            .map_err(storage_err)
        })
    }

    /// Insert the author unless the URL is already known, then read it back.
    ///
    /// Relies on the UNIQUE(url) conflict clause, so concurrent writers that
    /// race on the same author both end up with the same row.
    pub fn insert_if_absent(&self, author: &AuthorRef) -> Result<Author, FedibgsError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO authors (url, username) VALUES (?1, ?2)
                 ON CONFLICT(url) DO NOTHING",
                rusqlite::params![author.url, author.username],
            )
            .map_err(storage_err)?;

            find_author_by_url(conn, &author.url)?.ok_or_else(|| {
                FedibgsError::Storage(format!("Author {} missing after insert", author.url))
            })
        })
    }

    /// Case-insensitive substring search over usernames and profile URLs.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Author>, FedibgsError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("%{}%", escape_like(query));

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, url, username FROM authors
                     WHERE username LIKE ?1 ESCAPE '\\' OR url LIKE ?1 ESCAPE '\\'
                     ORDER BY length(username), username
                     LIMIT ?2",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map(rusqlite::params![pattern, limit as i64], row_to_author)
                .map_err(storage_err)?;

            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
    }
}

/// An attachment vector paired with its owning post.
#[derive(Debug, Clone)]
pub struct AttachmentVector {
    pub attachment_id: i64,
    pub post_id: Uuid,
    pub url: String,
    pub embedding: Vec<f32>,
}

/// Repository for posts and their attachments.
pub struct PostRepository {
    db: Arc<Database>,
}

impl PostRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Whether a post with this id has been committed.
    pub fn exists(&self, id: Uuid) -> Result<bool, FedibgsError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM posts WHERE id = ?1",
                rusqlite::params![id.to_string()],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(storage_err)
        })
    }

    /// Insert a post and its attachments atomically.
    ///
    /// Any failure rolls back the whole record. A primary-key conflict on
    /// the post row means another writer committed the same post first and
    /// is reported as [`PersistOutcome::Duplicate`].
    pub fn insert(
        &self,
        post: &NewPost,
        attachments: &[NewAttachment],
    ) -> Result<PersistOutcome, FedibgsError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(storage_err)?;

            match insert_post_row(&tx, post) {
                Ok(()) => {}
                Err(FedibgsError::ConstraintViolation(msg)) => {
                    debug!(post_id = %post.id, reason = %msg, "Post already committed by another writer");
                    return Ok(PersistOutcome::Duplicate);
                }
                Err(e) => return Err(e),
            }

            for attachment in attachments {
                insert_attachment_row(&tx, post.id, attachment)?;
            }

            tx.commit().map_err(storage_err)?;
            Ok(PersistOutcome::Stored)
        })
    }

    /// Find a post by id.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Post>, FedibgsError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, content, text_embedding, post_url, tags, author_id, indexed_at
                     FROM posts WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_post(row)),
                )
                .optional()
                .map_err(storage_err)?;

            row.transpose()
        })
    }

    /// All post embeddings, for brute-force vector ranking.
    pub fn embeddings(&self) -> Result<Vec<(Uuid, Vec<f32>)>, FedibgsError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, text_embedding FROM posts WHERE text_embedding IS NOT NULL")
                .map_err(storage_err)?;

            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let blob: Vec<u8> = row.get(1)?;
                    Ok((id, blob))
                })
                .map_err(storage_err)?;

            let mut out = Vec::new();
            for row in rows {
                let (id, blob) = row.map_err(storage_err)?;
                out.push((parse_uuid(&id)?, decode_vector(&blob)?));
            }
            Ok(out)
        })
    }

    /// All attachment embeddings.
    pub fn attachment_embeddings(&self) -> Result<Vec<AttachmentVector>, FedibgsError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, post_id, url, vector FROM attachments WHERE vector IS NOT NULL",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map([], |row| {
                    let id: i64 = row.get(0)?;
                    let post_id: String = row.get(1)?;
                    let url: String = row.get(2)?;
                    let blob: Vec<u8> = row.get(3)?;
                    Ok((id, post_id, url, blob))
                })
                .map_err(storage_err)?;

            let mut out = Vec::new();
            for row in rows {
                let (attachment_id, post_id, url, blob) = row.map_err(storage_err)?;
                out.push(AttachmentVector {
                    attachment_id,
                    post_id: parse_uuid(&post_id)?,
                    url,
                    embedding: decode_vector(&blob)?,
                });
            }
            Ok(out)
        })
    }

    /// Count stored posts.
    pub fn count(&self) -> Result<u64, FedibgsError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
                .map_err(storage_err)?;
            Ok(count as u64)
        })
    }
}

// ============================================================================
// Helper functions for statement execution and row conversion.
// ============================================================================

fn insert_post_row(conn: &Connection, post: &NewPost) -> Result<(), FedibgsError> {
    let tags = serde_json::to_string(&post.tags)?;
    conn.execute(
        "INSERT INTO posts (id, content, text_embedding, post_url, tags, author_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            post.id.to_string(),
            post.content,
            post.embedding.as_deref().map(encode_vector),
            post.post_url,
            tags,
            post.author_id,
        ],
    )
    .map_err(storage_err)?;
    Ok(())
}

fn insert_attachment_row(
    conn: &Connection,
    post_id: Uuid,
    attachment: &NewAttachment,
) -> Result<(), FedibgsError> {
    conn.execute(
        "INSERT INTO attachments (url, description, vector, post_id) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            attachment.url,
            attachment.description,
            attachment.embedding.as_deref().map(encode_vector),
            post_id.to_string(),
        ],
    )
    .map_err(storage_err)?;
    Ok(())
}

fn find_author_by_url(conn: &Connection, url: &str) -> Result<Option<Author>, FedibgsError> {
    conn.query_row(
        "SELECT id, url, username FROM authors WHERE url = ?1",
        rusqlite::params![url],
        row_to_author,
    )
    .optional()
    .map_err(storage_err)
}

pub(crate) fn row_to_author(row: &rusqlite::Row<'_>) -> rusqlite::Result<Author> {
    Ok(Author {
        id: row.get(0)?,
        url: row.get(1)?,
        username: row.get(2)?,
    })
}

fn row_to_post(row: &rusqlite::Row<'_>) -> Result<Post, FedibgsError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let content: String = row.get(1).map_err(storage_err)?;
    let blob: Option<Vec<u8>> = row.get(2).map_err(storage_err)?;
    let post_url: String = row.get(3).map_err(storage_err)?;
    let tags: String = row.get(4).map_err(storage_err)?;
    let author_id: i64 = row.get(5).map_err(storage_err)?;
    let indexed_at: i64 = row.get(6).map_err(storage_err)?;

    Ok(Post {
        id: parse_uuid(&id)?,
        content,
        embedding: blob.as_deref().map(decode_vector).transpose()?,
        post_url,
        tags: parse_tags(&tags),
        author_id,
        indexed_at: millis_to_datetime(indexed_at),
    })
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, FedibgsError> {
    Uuid::parse_str(s).map_err(|e| FedibgsError::Storage(format!("Invalid UUID: {}", e)))
}

/// Tags are a JSON array; anything else is treated as no tags.
pub(crate) fn parse_tags(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
