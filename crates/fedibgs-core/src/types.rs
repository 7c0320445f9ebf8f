use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FedibgsError;

// =============================================================================
// Ingestion records (transient, queue payload)
// =============================================================================

/// Author reference carried by a candidate record before it is resolved to
/// a stored [`Author`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorRef {
    pub url: String,
    pub username: String,
}

/// An image attachment that survived the resolver probe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentCandidate {
    /// Canonical URL: redirects followed, query string removed.
    pub url: String,
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A normalized post produced by the Timeline Listener and consumed exactly
/// once by the Batch Consumer.
///
/// `id` is a pure function of the post URL and is the system-wide dedup key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: Uuid,
    pub content: String,
    pub attachments: Vec<AttachmentCandidate>,
    pub tags: BTreeSet<String>,
    pub author: AuthorRef,
    #[serde(rename = "postURL")]
    pub post_url: String,
    #[serde(rename = "observedAt")]
    pub observed_at: DateTime<Utc>,
}

// =============================================================================
// Persisted entities
// =============================================================================

/// A stored author. Created lazily on first sighting and never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub url: String,
    pub username: String,
}

/// A stored post. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub content: String,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub post_url: String,
    pub tags: Vec<String>,
    pub author_id: i64,
    pub indexed_at: DateTime<Utc>,
}

/// Insert payload for a post; `indexed_at` is assigned by the store.
#[derive(Clone, Debug, PartialEq)]
pub struct NewPost {
    pub id: Uuid,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub post_url: String,
    pub tags: Vec<String>,
    pub author_id: i64,
}

/// Insert payload for an attachment of a [`NewPost`].
#[derive(Clone, Debug, PartialEq)]
pub struct NewAttachment {
    pub url: String,
    pub description: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Result of a write whose key may already exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    /// The record was written.
    Stored,
    /// The key already existed; nothing was written.
    Duplicate,
}

// =============================================================================
// Search
// =============================================================================

/// Which relevance signals a search uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Vector distance to the query embedding only.
    Semantic,
    /// Full-text relevance only.
    #[serde(alias = "full_text")]
    Lexical,
    /// Reciprocal-rank fusion of both.
    #[default]
    #[serde(alias = "combined")]
    Hybrid,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Lexical => "lexical",
            SearchMode::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

impl FromStr for SearchMode {
    type Err = FedibgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "semantic" => Ok(SearchMode::Semantic),
            "lexical" | "full_text" => Ok(SearchMode::Lexical),
            "hybrid" | "combined" => Ok(SearchMode::Hybrid),
            other => Err(FedibgsError::Search(format!(
                "Unknown search mode '{}'. Must be one of: semantic, lexical, hybrid",
                other
            ))),
        }
    }
}

/// Rolling-window ingestion counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub posts: u64,
    pub attachments: u64,
}
