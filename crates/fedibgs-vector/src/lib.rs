//! FediBGS vector crate - embedding service, embedding cache, rank fusion,
//! and the hybrid search engine.
//!
//! Provides the inference collaborator contract with an HTTP client and a
//! mock implementation for testing, a cache-aside embedding path keyed by
//! content hash, brute-force cosine ranking, and reciprocal-rank fusion of
//! semantic and lexical rankings.

pub mod cache;
pub mod distance;
pub mod embedding;
pub mod fusion;
pub mod search;

pub use cache::{cache_key, CacheStore, EmbeddingCache, MemoryCacheStore};
pub use embedding::{ClipHttpEncoder, DynEmbeddingService, EmbeddingService, MockEmbedding};
pub use fusion::{competition_ranks, fuse, Fused, Ranked};
pub use search::{AttachmentHit, HybridSearchEngine, LexicalPage, SearchHit};
