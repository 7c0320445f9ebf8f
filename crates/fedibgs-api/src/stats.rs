//! Rolling-window index statistics with a short-lived cached value.
//!
//! The cached counts sit in atomics next to the time they were computed.
//! A reader that finds them expired recomputes and publishes new counts, so
//! two concurrent readers may both recompute once; neither ever serves a
//! value older than the TTL.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use fedibgs_core::config::ApiConfig;
use fedibgs_core::error::Result;
use fedibgs_core::types::IndexStats;
use fedibgs_storage::{Database, QueryService};

const MILLIS_PER_DAY: i64 = 86_400_000;

pub struct StatsCache {
    db: Arc<Database>,
    queries: QueryService,
    window_days: i64,
    ttl: Duration,
    origin: Instant,
    /// Milliseconds since `origin` at computation, plus one. Zero means empty.
    computed_at: AtomicU64,
    posts: AtomicU64,
    attachments: AtomicU64,
}

impl StatsCache {
    pub fn new(db: Arc<Database>, config: &ApiConfig) -> Self {
        Self {
            queries: QueryService::new(Arc::clone(&db)),
            db,
            window_days: config.stats_window_days,
            ttl: Duration::from_secs(config.stats_ttl_secs),
            origin: Instant::now(),
            computed_at: AtomicU64::new(0),
            posts: AtomicU64::new(0),
            attachments: AtomicU64::new(0),
        }
    }

    /// Posts and attachments indexed within the window.
    pub fn get(&self) -> Result<IndexStats> {
        if let Some(stats) = self.fresh() {
            return Ok(stats);
        }

        let since = self.db.now_millis()? - self.window_days * MILLIS_PER_DAY;
        let stats = self.queries.stats_since(since)?;
        debug!(posts = stats.posts, attachments = stats.attachments, "Index stats recomputed");

        self.posts.store(stats.posts, Ordering::Relaxed);
        self.attachments.store(stats.attachments, Ordering::Relaxed);
        self.computed_at.store(self.elapsed_ms() + 1, Ordering::Release);
        Ok(stats)
    }

    fn fresh(&self) -> Option<IndexStats> {
        let stamp = self.computed_at.load(Ordering::Acquire);
        if stamp == 0 {
            return None;
        }
        let age = Duration::from_millis(self.elapsed_ms().saturating_sub(stamp - 1));
        if age >= self.ttl {
            return None;
        }
        Some(IndexStats {
            posts: self.posts.load(Ordering::Relaxed),
            attachments: self.attachments.load(Ordering::Relaxed),
        })
    }

    fn elapsed_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedibgs_core::types::{AuthorRef, NewAttachment, NewPost};
    use fedibgs_storage::{AuthorRepository, PostRepository};
    use uuid::Uuid;

    fn insert_post(db: &Arc<Database>, n: u128) {
        let author = AuthorRepository::new(Arc::clone(db))
            .insert_if_absent(&AuthorRef {
                url: "https://x/@a".to_string(),
                username: "a".to_string(),
            })
            .unwrap();
        PostRepository::new(Arc::clone(db))
            .insert(
                &NewPost {
                    id: Uuid::from_u128(n),
                    content: format!("post {}", n),
                    embedding: None,
                    post_url: format!("https://x/{}", n),
                    tags: vec![],
                    author_id: author.id,
                },
                &[NewAttachment {
                    url: format!("https://cdn/{}.png", n),
                    description: None,
                    embedding: None,
                }],
            )
            .unwrap();
    }

    #[test]
    fn test_value_is_reused_within_ttl() {
        let db = Arc::new(Database::in_memory().unwrap());
        let cache = StatsCache::new(Arc::clone(&db), &ApiConfig::default());
        insert_post(&db, 1);

        assert_eq!(cache.get().unwrap(), IndexStats { posts: 1, attachments: 1 });
        insert_post(&db, 2);
        assert_eq!(cache.get().unwrap().posts, 1);
    }

    #[test]
    fn test_expired_value_is_recomputed() {
        let db = Arc::new(Database::in_memory().unwrap());
        let config = ApiConfig {
            stats_ttl_secs: 0,
            ..ApiConfig::default()
        };
        let cache = StatsCache::new(Arc::clone(&db), &config);

        assert_eq!(cache.get().unwrap().posts, 0);
        insert_post(&db, 1);
        assert_eq!(cache.get().unwrap().posts, 1);
    }

    #[test]
    fn test_concurrent_readers_share_one_value() {
        let db = Arc::new(Database::in_memory().unwrap());
        insert_post(&db, 1);
        let cache = Arc::new(StatsCache::new(Arc::clone(&db), &ApiConfig::default()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get().unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), IndexStats { posts: 1, attachments: 1 });
        }

        insert_post(&db, 2);
        assert_eq!(cache.get().unwrap().posts, 1);
    }
}
