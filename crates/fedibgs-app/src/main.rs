//! FediBGS application binary - composition root.
//!
//! Ties together all FediBGS crates into a single executable:
//! 1. Load configuration from TOML and apply CLI/env overrides
//! 2. Open the SQLite store and build the embedding cache
//! 3. Run one of: the ingestion supervisor, the API server, or a CLI search

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use fedibgs_core::config::FedibgsConfig;
use fedibgs_core::error::FedibgsError;
use fedibgs_core::types::SearchMode;
use fedibgs_storage::{Database, EmbeddingCacheRepository};
use fedibgs_vector::{
    CacheStore, ClipHttpEncoder, DynEmbeddingService, EmbeddingCache, HybridSearchEngine,
    MockEmbedding,
};

use fedibgs_api::state::AppState;
use fedibgs_ingest::{
    ActivitySignal, BatchConsumer, BatchProcessor, BatchQueue, ConsumerWorker,
    HttpAttachmentResolver, MemoryQueue, TimelineListener, Watchdog,
};

use cli::{CliArgs, Command};

/// Results printed per section by `fedibgs search`.
const CLI_SEARCH_LIMIT: usize = 5;

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}

/// The inference client named by `embedding.backend`, behind the cache.
fn build_embedding_cache(
    config: &FedibgsConfig,
    db: Arc<Database>,
) -> Result<Arc<EmbeddingCache>, FedibgsError> {
    let encoder: Arc<dyn DynEmbeddingService> = match config.embedding.backend.as_str() {
        "clip-http" => Arc::new(ClipHttpEncoder::new(&config.embedding)?),
        "mock" => Arc::new(MockEmbedding::with_dimensions(config.embedding.dimensions)),
        other => {
            return Err(FedibgsError::Config(format!(
                "Unknown embedding backend '{}'. Must be one of: clip-http, mock",
                other
            )))
        }
    };
    info!(
        backend = %config.embedding.backend,
        endpoint = %config.embedding.endpoint,
        dimensions = encoder.dimensions(),
        "Embedding service ready"
    );

    let store: Arc<dyn CacheStore> = Arc::new(EmbeddingCacheRepository::new(db));
    Ok(Arc::new(EmbeddingCache::new(store, encoder)))
}

/// Run the ingestion process until the stream fails, stalls, or the
/// process is interrupted.
///
/// Every exit path performs the same controlled shutdown: flush the
/// listener's partial batch (bounded in time), close the queue, and let the
/// workers drain it, including batches still waiting on a retry.
/// A fatal stream error is returned so that the supervisor sees a failed
/// exit and restarts the process.
async fn run_ingest(
    config: &FedibgsConfig,
    db: Arc<Database>,
    embeddings: Arc<EmbeddingCache>,
) -> Result<(), FedibgsError> {
    let queue: Arc<dyn BatchQueue> = Arc::new(MemoryQueue::new(config.queue.capacity));
    let processor: Arc<dyn BatchProcessor> = Arc::new(BatchConsumer::new(db, embeddings));

    let workers: Vec<_> = (0..config.consumer.workers.max(1))
        .map(|id| {
            let worker = ConsumerWorker::new(
                id,
                Arc::clone(&queue),
                Arc::clone(&processor),
                &config.consumer,
            );
            tokio::spawn(worker.run())
        })
        .collect();
    info!(workers = workers.len(), "Consumer workers started");

    let activity = Arc::new(ActivitySignal::new());
    let resolver = Arc::new(HttpAttachmentResolver::new(
        config.listener.probe_timeout(),
        &config.stream.user_agent,
    )?);
    let mut listener = TimelineListener::new(
        resolver,
        Arc::clone(&queue),
        Arc::clone(&activity),
        config.listener.buffer_capacity,
    );
    let watchdog = Watchdog::new(&config.watchdog);

    let outcome = match fedibgs_ingest::connect(&config.stream).await {
        Ok(events) => {
            tokio::select! {
                result = listener.run(events) => result,
                fatal = watchdog.run(Arc::clone(&activity)) => Err(fatal),
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, shutting down");
                    Ok(())
                }
            }
        }
        Err(e) => Err(e),
    };

    if let Err(ref e) = outcome {
        error!(error = %e, "Ingestion stopped");
    }

    match listener
        .flush_within(config.listener.shutdown_flush_timeout())
        .await
    {
        Ok(0) => {}
        Ok(count) => info!(records = count, "Final batch flushed"),
        Err(e) => warn!(error = %e, "Final flush failed"),
    }
    if listener.buffered() > 0 {
        warn!(records = listener.buffered(), "Unflushed records dropped at shutdown");
    }

    queue.close();
    for handle in workers {
        match handle.await {
            Ok(stats) => info!(
                batches = stats.batches,
                stored = stats.stored,
                duplicates = stats.duplicates,
                dropped = stats.dropped,
                "Consumer worker finished"
            ),
            Err(e) => error!(error = %e, "Consumer worker panicked"),
        }
    }

    let snapshot = activity.snapshot();
    info!(
        accepted = snapshot.accepted,
        flushed = snapshot.flushed,
        "Ingestion shut down"
    );
    outcome
}

async fn run_serve(
    config: FedibgsConfig,
    db: Arc<Database>,
    embeddings: Arc<EmbeddingCache>,
) -> Result<(), FedibgsError> {
    let port = config.general.port;
    let state = AppState::new(config, db, embeddings);
    fedibgs_api::start_server(port, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Interrupt received, stopping server");
    })
    .await
}

async fn run_search(
    config: &FedibgsConfig,
    db: Arc<Database>,
    embeddings: Arc<EmbeddingCache>,
    query: &str,
) -> Result<(), FedibgsError> {
    let engine = HybridSearchEngine::new(db, embeddings, &config.search);

    let posts = engine.search(query, SearchMode::Semantic, true).await?;
    println!("Posts:");
    for hit in posts.iter().take(CLI_SEARCH_LIMIT) {
        println!(
            "  {:.4}  {}  {}",
            hit.score,
            hit.post.post_url,
            hit.post.content.replace('\n', " ")
        );
    }

    let attachments = engine
        .nearest_attachments(query, CLI_SEARCH_LIMIT, true)
        .await?;
    println!("Attachments:");
    for hit in &attachments {
        println!("  {:.4}  {}", hit.distance, hit.url);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config, before tracing so the configured level applies.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match FedibgsConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (FedibgsConfig::default(), Some(e)),
    };
    args.apply_overrides(&mut config);

    init_tracing(&config.general.log_level);
    info!("Starting FediBGS v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!(path = %config_file.display(), "Configuration loaded"),
        Some(e) => warn!(path = %config_file.display(), error = %e, "Using default configuration"),
    }

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    let db_path = data_dir.join("fedibgs.db");
    let db = Arc::new(Database::new(&db_path)?);
    info!(path = %db_path.display(), "SQLite database opened");

    let embeddings = build_embedding_cache(&config, Arc::clone(&db))?;

    match args.command {
        Command::Ingest { .. } => run_ingest(&config, db, embeddings).await?,
        Command::Serve { .. } => run_serve(config, db, embeddings).await?,
        Command::Search { ref words } => {
            run_search(&config, db, embeddings, &words.join(" ")).await?
        }
    }

    Ok(())
}
