//! Full-text search using SQLite FTS5.
//!
//! Provides lexical relevance over the `posts_fts` virtual table (Porter
//! stemming), ranked by BM25.

use std::sync::Arc;

use uuid::Uuid;

use fedibgs_core::error::FedibgsError;

use crate::db::{storage_err, Database};
use crate::repository::parse_uuid;

/// A single lexical hit.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub id: Uuid,
    /// BM25 relevance, negated so that higher is more relevant.
    pub score: f64,
}

/// Full-text search engine backed by FTS5.
pub struct FtsSearch {
    db: Arc<Database>,
}

impl FtsSearch {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Every post matching `query`, most relevant first.
    ///
    /// Ties are broken by post id so that the order is stable across calls.
    pub fn ranked(&self, query: &str) -> Result<Vec<LexicalHit>, FedibgsError> {
        self.page(query, 0, None)
    }

    /// One page of matches, most relevant first.
    pub fn page(
        &self,
        query: &str,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<LexicalHit>, FedibgsError> {
        let Some(fts_query) = sanitize_fts5_query(query) else {
            return Ok(Vec::new());
        };
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT p.id, bm25(posts_fts) AS score
                     FROM posts_fts
                     JOIN posts p ON p.rowid = posts_fts.rowid
                     WHERE posts_fts MATCH ?1
                     ORDER BY score, p.id
                     LIMIT ?2 OFFSET ?3",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map(rusqlite::params![fts_query, limit, offset as i64], |row| {
                    let id: String = row.get(0)?;
                    let score: f64 = row.get(1)?;
                    Ok((id, score))
                })
                .map_err(storage_err)?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, score) = row.map_err(storage_err)?;
                hits.push(LexicalHit {
                    id: parse_uuid(&id)?,
                    // bm25() is negative, lower = better.
                    score: -score,
                });
            }
            Ok(hits)
        })
    }

    /// Count total matches for a query.
    pub fn count_matches(&self, query: &str) -> Result<u64, FedibgsError> {
        let Some(fts_query) = sanitize_fts5_query(query) else {
            return Ok(0);
        };

        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM posts_fts WHERE posts_fts MATCH ?1",
                    rusqlite::params![fts_query],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            Ok(count as u64)
        })
    }
}

/// Turn free text into an FTS5 query that cannot fail to parse.
///
/// Every alphanumeric run becomes a quoted term and the terms are implicitly
/// ANDed, so operators, quotes and stray punctuation never reach the FTS5
/// parser. Returns `None` when nothing searchable remains.
pub fn sanitize_fts5_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}
