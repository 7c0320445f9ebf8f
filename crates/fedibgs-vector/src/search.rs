//! Hybrid search engine combining vector and full-text relevance.
//!
//! The semantic ranking orders posts by cosine distance to the query
//! embedding. The lexical ranking orders FTS5 matches by BM25. Hybrid mode
//! fuses the two by reciprocal rank. Attachments and authors are loaded
//! afterwards for the ranked ids only.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use fedibgs_core::config::SearchConfig;
use fedibgs_core::error::FedibgsError;
use fedibgs_core::types::SearchMode;
use fedibgs_storage::{Database, FtsSearch, PostRepository, PostView, QueryService};

use crate::cache::EmbeddingCache;
use crate::distance::{cosine_distance, nearest};
use crate::fusion::{competition_ranks, fuse, Fused, Ranked};

/// A ranked post with its score and the ranks that produced it.
///
/// `score` is the fused score in hybrid mode, cosine similarity in semantic
/// mode and BM25 relevance in lexical mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub post: PostView,
    pub score: f64,
    pub semantic_rank: Option<u32>,
    pub lexical_rank: Option<u32>,
}

/// One page of lexical browse results plus the total match count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalPage {
    pub hits: Vec<SearchHit>,
    pub total: u64,
}

/// An attachment close to a query in embedding space.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentHit {
    pub attachment_id: i64,
    pub post_id: Uuid,
    pub url: String,
    pub distance: f64,
}

pub struct HybridSearchEngine {
    posts: PostRepository,
    fts: FtsSearch,
    queries: QueryService,
    cache: Arc<EmbeddingCache>,
    hybrid_limit: usize,
    page_size: usize,
}

impl HybridSearchEngine {
    pub fn new(db: Arc<Database>, cache: Arc<EmbeddingCache>, config: &SearchConfig) -> Self {
        Self {
            posts: PostRepository::new(Arc::clone(&db)),
            fts: FtsSearch::new(Arc::clone(&db)),
            queries: QueryService::new(db),
            cache,
            hybrid_limit: config.hybrid_limit,
            page_size: config.page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Rank posts for `query` and return at most `hybrid_limit` of them.
    ///
    /// Semantic mode fails if the query cannot be embedded. Hybrid mode
    /// falls back to the lexical ranking alone in that case.
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        use_cache: bool,
    ) -> Result<Vec<SearchHit>, FedibgsError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let ranked: Vec<Fused> = match mode {
            SearchMode::Semantic => {
                let query_vec = self.cache.embed(query, use_cache).await?;
                self.semantic_only(&query_vec)?
            }
            SearchMode::Lexical => self.lexical_only(query)?,
            SearchMode::Hybrid => {
                let semantic = match self.cache.embed(query, use_cache).await {
                    Ok(query_vec) => self.semantic_ranking(&query_vec)?,
                    Err(e) => {
                        warn!(error = %e, "Query embedding failed, ranking lexically only");
                        Vec::new()
                    }
                };
                let lexical = competition_ranks(
                    &self
                        .fts
                        .ranked(query)?
                        .into_iter()
                        .map(|hit| (hit.id, hit.score))
                        .collect::<Vec<_>>(),
                );
                fuse(&semantic, &lexical, self.hybrid_limit)
            }
        };

        debug!(mode = %mode, hits = ranked.len(), "Search ranked");
        self.enrich(ranked)
    }

    /// Offset-paginated lexical browse with a separate total count.
    pub fn lexical_page(&self, query: &str, offset: u64) -> Result<LexicalPage, FedibgsError> {
        let total = self.fts.count_matches(query)?;
        let hits = self.fts.page(query, offset, Some(self.page_size as u64))?;

        let ranked = hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| Fused {
                id: hit.id,
                score: hit.score,
                semantic_rank: None,
                lexical_rank: Some(offset as u32 + i as u32 + 1),
            })
            .collect();

        Ok(LexicalPage {
            hits: self.enrich(ranked)?,
            total,
        })
    }

    /// The `k` attachments nearest to `query`.
    pub async fn nearest_attachments(
        &self,
        query: &str,
        k: usize,
        use_cache: bool,
    ) -> Result<Vec<AttachmentHit>, FedibgsError> {
        let query_vec = self.cache.embed(query.trim(), use_cache).await?;
        let mut hits: Vec<AttachmentHit> = self
            .posts
            .attachment_embeddings()?
            .into_iter()
            .map(|a| AttachmentHit {
                distance: cosine_distance(&query_vec, &a.embedding),
                attachment_id: a.attachment_id,
                post_id: a.post_id,
                url: a.url,
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.attachment_id.cmp(&b.attachment_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Every post with an embedding, ranked by ascending cosine distance.
    fn semantic_ranking(&self, query_vec: &[f32]) -> Result<Vec<Ranked>, FedibgsError> {
        let by_distance = nearest(query_vec, self.posts.embeddings()?);
        Ok(competition_ranks(&by_distance))
    }

    fn semantic_only(&self, query_vec: &[f32]) -> Result<Vec<Fused>, FedibgsError> {
        let by_distance = nearest(query_vec, self.posts.embeddings()?);
        let ranks = competition_ranks(&by_distance);
        Ok(by_distance
            .into_iter()
            .zip(ranks)
            .take(self.hybrid_limit)
            .map(|((id, distance), r)| Fused {
                id,
                score: 1.0 - distance,
                semantic_rank: Some(r.rank),
                lexical_rank: None,
            })
            .collect())
    }

    fn lexical_only(&self, query: &str) -> Result<Vec<Fused>, FedibgsError> {
        let scored: Vec<(Uuid, f64)> = self
            .fts
            .page(query, 0, Some(self.hybrid_limit as u64))?
            .into_iter()
            .map(|hit| (hit.id, hit.score))
            .collect();
        let ranks = competition_ranks(&scored);
        Ok(scored
            .into_iter()
            .zip(ranks)
            .map(|((id, score), r)| Fused {
                id,
                score,
                semantic_rank: None,
                lexical_rank: Some(r.rank),
            })
            .collect())
    }

    /// Load posts for the ranked ids and attach their scores, keeping order.
    fn enrich(&self, ranked: Vec<Fused>) -> Result<Vec<SearchHit>, FedibgsError> {
        let ids: Vec<Uuid> = ranked.iter().map(|f| f.id).collect();
        let posts = self.queries.posts_by_ids(&ids)?;

        let mut by_id: std::collections::HashMap<Uuid, PostView> =
            posts.into_iter().map(|p| (p.id, p)).collect();

        Ok(ranked
            .into_iter()
            .filter_map(|f| {
                by_id.remove(&f.id).map(|post| SearchHit {
                    post,
                    score: f.score,
                    semantic_rank: f.semantic_rank,
                    lexical_rank: f.lexical_rank,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryCacheStore};
    use crate::embedding::MockEmbedding;
    use fedibgs_core::types::{AuthorRef, NewAttachment, NewPost};
    use fedibgs_storage::AuthorRepository;

    struct Harness {
        engine: HybridSearchEngine,
        posts: PostRepository,
        mock: MockEmbedding,
        author_id: i64,
    }

    fn harness_with(mock: MockEmbedding) -> Harness {
        let db = Arc::new(Database::in_memory().unwrap());
        let author = AuthorRepository::new(Arc::clone(&db))
            .insert_if_absent(&AuthorRef {
                url: "https://mastodon.example/@alice".into(),
                username: "alice".into(),
            })
            .unwrap();
        let cache = Arc::new(EmbeddingCache::new(
            Arc::new(MemoryCacheStore::new()) as Arc<dyn CacheStore>,
            Arc::new(mock.clone()),
        ));
        Harness {
            engine: HybridSearchEngine::new(Arc::clone(&db), cache, &SearchConfig::default()),
            posts: PostRepository::new(db),
            mock,
            author_id: author.id,
        }
    }

    fn harness() -> Harness {
        harness_with(MockEmbedding::with_dimensions(16))
    }

    impl Harness {
        /// Store a post whose embedding equals the mock vector of `vector_of`.
        fn post(&self, content: &str, vector_of: Option<&str>) -> Uuid {
            let id = Uuid::new_v4();
            self.posts
                .insert(
                    &NewPost {
                        id,
                        content: content.into(),
                        embedding: vector_of.map(|v| self.mock.hash_to_vector(v)),
                        post_url: format!("https://mastodon.example/{}", id),
                        tags: vec![],
                        author_id: self.author_id,
                    },
                    &[NewAttachment {
                        url: format!("https://cdn.example/{}.png", id),
                        description: None,
                        embedding: vector_of.map(|v| self.mock.hash_to_vector(v)),
                    }],
                )
                .unwrap();
            id
        }
    }

    #[tokio::test]
    async fn test_hybrid_rewards_agreement() {
        let h = harness();
        // Semantic rank 1 and lexical match.
        let both = h.post("otters holding hands", Some("otters"));
        // Lexical match only, no embedding.
        let lexical = h.post("otters again", None);
        // Semantically distant, no lexical match.
        let other = h.post("tax law", Some("tax law"));

        let hits = h.engine.search("otters", SearchMode::Hybrid, true).await.unwrap();
        let ids: Vec<Uuid> = hits.iter().map(|hit| hit.post.id).collect();

        assert_eq!(ids[0], both);
        let expected = 0.5 + 1.0 / (1.0 + hits[0].lexical_rank.unwrap() as f64);
        assert!((hits[0].score - expected).abs() < 1e-9);
        assert_eq!(hits[0].semantic_rank, Some(1));
        assert!(ids.contains(&lexical));
        assert!(ids.contains(&other));

        let lexical_hit = hits.iter().find(|hit| hit.post.id == lexical).unwrap();
        assert_eq!(lexical_hit.semantic_rank, None);
    }

    #[tokio::test]
    async fn test_semantic_mode_excludes_posts_without_vectors() {
        let h = harness();
        let near = h.post("anything", Some("kittens"));
        h.post("kittens", None);

        let hits = h.engine.search("kittens", SearchMode::Semantic, true).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post.id, near);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].post.attachments.len(), 1);
    }

    #[tokio::test]
    async fn test_lexical_mode_skips_encoder() {
        let h = harness();
        let id = h.post("rust release notes", Some("rust"));

        let hits = h.engine.search("release", SearchMode::Lexical, true).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post.id, id);
        assert_eq!(hits[0].lexical_rank, Some(1));
        assert_eq!(h.mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_semantic_mode_requires_encoder() {
        let h = harness_with(MockEmbedding::failing());
        h.post("otters", None);

        assert!(h.engine.search("otters", SearchMode::Semantic, true).await.is_err());

        let hits = h.engine.search("otters", SearchMode::Hybrid, true).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_and_unmatched_queries_return_nothing() {
        let h = harness();
        h.post("hello world", None);

        assert!(h.engine.search("   ", SearchMode::Hybrid, true).await.unwrap().is_empty());
        assert!(h.engine.search("zzz", SearchMode::Lexical, true).await.unwrap().is_empty());
        assert!(h.engine.search("(\"", SearchMode::Lexical, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_truncates_to_limit() {
        let h = harness();
        for i in 0..30 {
            h.post(&format!("post number {}", i), Some(&format!("v{}", i)));
        }
        let hits = h.engine.search("number", SearchMode::Hybrid, true).await.unwrap();
        assert_eq!(hits.len(), SearchConfig::default().hybrid_limit);
    }

    #[test]
    fn test_lexical_page_counts_all_matches() {
        let h = harness();
        for i in 0..55 {
            h.post(&format!("browse entry {}", i), None);
        }

        let first = h.engine.lexical_page("browse", 0).unwrap();
        assert_eq!(first.total, 55);
        assert_eq!(first.hits.len(), 50);
        assert_eq!(first.hits[0].lexical_rank, Some(1));

        let second = h.engine.lexical_page("browse", 50).unwrap();
        assert_eq!(second.hits.len(), 5);
        assert_eq!(second.hits[0].lexical_rank, Some(51));
    }

    #[tokio::test]
    async fn test_nearest_attachments() {
        let h = harness();
        let target = h.post("a", Some("sunset"));
        h.post("b", Some("spreadsheet"));

        let hits = h.engine.nearest_attachments("sunset", 5, true).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].post_id, target);
        assert!(hits[0].distance < hits[1].distance);
    }
}
