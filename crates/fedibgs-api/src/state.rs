//! Application state shared across all route handlers.
//!
//! AppState holds references to the store, the search engine, and the
//! read-side services. It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fedibgs_core::config::FedibgsConfig;
use fedibgs_storage::{AuthorRepository, Database, QueryService};
use fedibgs_vector::{EmbeddingCache, HybridSearchEngine};

use crate::stats::StatsCache;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FedibgsConfig>,
    pub database: Arc<Database>,
    pub search_engine: Arc<HybridSearchEngine>,
    pub query_service: Arc<QueryService>,
    pub authors: Arc<AuthorRepository>,
    pub stats: Arc<StatsCache>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: FedibgsConfig,
        database: Arc<Database>,
        embeddings: Arc<EmbeddingCache>,
    ) -> Self {
        let search_engine =
            HybridSearchEngine::new(Arc::clone(&database), embeddings, &config.search);
        let stats = StatsCache::new(Arc::clone(&database), &config.api);
        Self {
            search_engine: Arc::new(search_engine),
            query_service: Arc::new(QueryService::new(Arc::clone(&database))),
            authors: Arc::new(AuthorRepository::new(Arc::clone(&database))),
            stats: Arc::new(stats),
            database,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.config.api.stream_interval_ms.max(1))
    }
}
