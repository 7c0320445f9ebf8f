//! Read-side queries for the API layer.
//!
//! Posts are loaded by id with their author, and attachments are fetched in
//! a second lookup restricted to those ids and merged in afterward, so the
//! order chosen by the caller is never disturbed by attachment fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use fedibgs_core::error::FedibgsError;
use fedibgs_core::types::{Author, IndexStats};

use crate::db::{storage_err, Database};
use crate::repository::{millis_to_datetime, parse_tags, parse_uuid};
use crate::search::sanitize_fts5_query;

/// Bound on bound parameters per `IN (...)` lookup.
const ID_CHUNK: usize = 500;

/// A post as returned to API clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostView {
    pub id: Uuid,
    pub content: String,
    pub post_url: String,
    pub tags: Vec<String>,
    pub indexed_at: DateTime<Utc>,
    pub author: Author,
    pub attachments: Vec<AttachmentView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentView {
    pub id: i64,
    pub url: String,
    pub description: Option<String>,
}

/// Read-only query service.
pub struct QueryService {
    db: Arc<Database>,
}

impl QueryService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Load posts in the order of `ids`. Unknown ids are skipped.
    pub fn posts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<PostView>, FedibgsError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| load_posts(conn, ids))
    }

    /// Posts indexed strictly after `cursor_ms`, oldest first, optionally
    /// restricted to lexical matches of `query`.
    ///
    /// A query with no searchable terms applies no filter.
    pub fn posts_since(
        &self,
        cursor_ms: i64,
        query: Option<&str>,
    ) -> Result<Vec<PostView>, FedibgsError> {
        let fts_query = query.and_then(sanitize_fts5_query);

        self.db.with_conn(|conn| {
            let (sql, params_vec): (&str, Vec<Box<dyn rusqlite::types::ToSql>>) =
                if let Some(q) = fts_query {
                    (
                        "SELECT p.id FROM posts p
                         WHERE p.indexed_at > ?1
                           AND p.rowid IN (SELECT rowid FROM posts_fts WHERE posts_fts MATCH ?2)
                         ORDER BY p.indexed_at, p.id",
                        vec![
                            Box::new(cursor_ms) as Box<dyn rusqlite::types::ToSql>,
                            Box::new(q),
                        ],
                    )
                } else {
                    (
                        "SELECT p.id FROM posts p
                         WHERE p.indexed_at > ?1
                         ORDER BY p.indexed_at, p.id",
                        vec![Box::new(cursor_ms) as Box<dyn rusqlite::types::ToSql>],
                    )
                };

            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();

            let ids = select_ids(conn, sql, params_refs.as_slice())?;
            load_posts(conn, &ids)
        })
    }

    /// One page of an author's posts, newest first.
    pub fn author_posts(
        &self,
        author_id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<PostView>, FedibgsError> {
        self.db.with_conn(|conn| {
            let ids = select_ids(
                conn,
                "SELECT id FROM posts WHERE author_id = ?1
                 ORDER BY indexed_at DESC, id
                 LIMIT ?2 OFFSET ?3",
                rusqlite::params![author_id, limit as i64, offset as i64],
            )?;
            load_posts(conn, &ids)
        })
    }

    pub fn count_author_posts(&self, author_id: i64) -> Result<u64, FedibgsError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM posts WHERE author_id = ?1",
                    rusqlite::params![author_id],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            Ok(count as u64)
        })
    }

    /// Posts and attachments indexed at or after `since_ms`.
    pub fn stats_since(&self, since_ms: i64) -> Result<IndexStats, FedibgsError> {
        self.db.with_conn(|conn| {
            let (posts, attachments): (i64, i64) = conn
                .query_row(
                    "SELECT
                        (SELECT COUNT(*) FROM posts WHERE indexed_at >= ?1),
                        (SELECT COUNT(*) FROM attachments a
                           JOIN posts p ON p.id = a.post_id
                          WHERE p.indexed_at >= ?1)",
                    rusqlite::params![since_ms],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(storage_err)?;

            Ok(IndexStats {
                posts: posts as u64,
                attachments: attachments as u64,
            })
        })
    }
}

fn select_ids<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Uuid>, FedibgsError> {
    let mut stmt = conn.prepare(sql).map_err(storage_err)?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(storage_err)?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(parse_uuid(&row.map_err(storage_err)?)?);
    }
    Ok(ids)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn load_posts(conn: &Connection, ids: &[Uuid]) -> Result<Vec<PostView>, FedibgsError> {
    let mut by_id: HashMap<Uuid, PostView> = HashMap::with_capacity(ids.len());

    for chunk in ids.chunks(ID_CHUNK) {
        let sql = format!(
            "SELECT p.id, p.content, p.post_url, p.tags, p.indexed_at,
                    a.id, a.url, a.username
             FROM posts p
             JOIN authors a ON a.id = p.author_id
             WHERE p.id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(chunk.iter().map(|id| id.to_string())),
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        Author {
                            id: row.get(5)?,
                            url: row.get(6)?,
                            username: row.get(7)?,
                        },
                    ))
                },
            )
            .map_err(storage_err)?;

        for row in rows {
            let (id, content, post_url, tags, indexed_at, author) = row.map_err(storage_err)?;
            let id = parse_uuid(&id)?;
            by_id.insert(
                id,
                PostView {
                    id,
                    content,
                    post_url,
                    tags: parse_tags(&tags),
                    indexed_at: millis_to_datetime(indexed_at),
                    author,
                    attachments: Vec::new(),
                },
            );
        }
    }

    let mut attachments = load_attachments(conn, ids)?;

    Ok(ids
        .iter()
        .filter_map(|id| {
            let mut post = by_id.remove(id)?;
            post.attachments = attachments.remove(id).unwrap_or_default();
            Some(post)
        })
        .collect())
}

fn load_attachments(
    conn: &Connection,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<AttachmentView>>, FedibgsError> {
    let mut grouped: HashMap<Uuid, Vec<AttachmentView>> = HashMap::new();

    for chunk in ids.chunks(ID_CHUNK) {
        let sql = format!(
            "SELECT id, url, description, post_id FROM attachments
             WHERE post_id IN ({})
             ORDER BY id",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(chunk.iter().map(|id| id.to_string())),
                |row| {
                    Ok((
                        AttachmentView {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            description: row.get(2)?,
                        },
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .map_err(storage_err)?;

        for row in rows {
            let (attachment, post_id) = row.map_err(storage_err)?;
            grouped
                .entry(parse_uuid(&post_id)?)
                .or_default()
                .push(attachment);
        }
    }

    Ok(grouped)
}
