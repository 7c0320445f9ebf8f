//! FediBGS storage crate - SQLite persistence for authors, posts and
//! attachments.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories with
//! per-record transactional writes, FTS5 lexical search, read-side queries
//! for the API, and the persistent table behind the embedding cache.

pub mod codec;
pub mod db;
pub mod embedding_cache;
pub mod migrations;
pub mod queries;
pub mod repository;
pub mod search;

pub use db::{storage_err, Database};
pub use embedding_cache::EmbeddingCacheRepository;
pub use queries::{AttachmentView, PostView, QueryService};
pub use repository::{AttachmentVector, AuthorRepository, PostRepository};
pub use search::{sanitize_fts5_query, FtsSearch, LexicalHit};
