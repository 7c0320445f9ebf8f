//! Cache-aside embedding path in front of the inference collaborator.
//!
//! Vectors are addressed by `query:<sha256(text)>`. Entries are never
//! evicted: inputs are natural-language text and URIs, and reuse is
//! concentrated on repeated search queries.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use fedibgs_core::error::FedibgsError;
use fedibgs_storage::EmbeddingCacheRepository;

use crate::embedding::DynEmbeddingService;

/// Backing store for cached vectors.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<f32>>, FedibgsError>;
    fn put(&self, key: &str, vector: &[f32]) -> Result<(), FedibgsError>;
}

impl CacheStore for EmbeddingCacheRepository {
    fn get(&self, key: &str) -> Result<Option<Vec<f32>>, FedibgsError> {
        EmbeddingCacheRepository::get(self, key)
    }

    fn put(&self, key: &str, vector: &[f32]) -> Result<(), FedibgsError> {
        EmbeddingCacheRepository::put(self, key, vector)
    }
}

/// Process-local store, for tests and single-shot tools.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, Vec<f32>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<f32>>, FedibgsError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| FedibgsError::Embedding(format!("Cache lock poisoned: {}", e)))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, vector: &[f32]) -> Result<(), FedibgsError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| FedibgsError::Embedding(format!("Cache lock poisoned: {}", e)))?;
        entries.insert(key.to_string(), vector.to_vec());
        Ok(())
    }
}

/// Cache key for an embedding input.
pub fn cache_key(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("query:{}", hex::encode(digest))
}

/// Content-hash-addressed cache in front of an [`DynEmbeddingService`].
///
/// Store faults are logged and treated as misses; encoder faults are
/// returned to the caller, which decides whether a vector is optional.
pub struct EmbeddingCache {
    store: Arc<dyn CacheStore>,
    encoder: Arc<dyn DynEmbeddingService>,
}

impl EmbeddingCache {
    pub fn new(store: Arc<dyn CacheStore>, encoder: Arc<dyn DynEmbeddingService>) -> Self {
        Self { store, encoder }
    }

    pub fn dimensions(&self) -> usize {
        self.encoder.dimensions()
    }

    /// Embed one input. With `use_cache = false` the cached value is ignored
    /// and overwritten with a fresh one.
    pub async fn embed(&self, input: &str, use_cache: bool) -> Result<Vec<f32>, FedibgsError> {
        let key = cache_key(input);
        if use_cache {
            if let Some(hit) = self.lookup(&key) {
                debug!(key = %key, "Embedding cache hit");
                return Ok(hit);
            }
        }

        let inputs = [input.to_string()];
        let vector = self
            .encoder
            .encode_boxed(&inputs)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FedibgsError::Embedding("Encoder returned no vector".to_string()))?;

        self.store_vector(&key, &vector);
        Ok(vector)
    }

    /// Embed many inputs, sending only the distinct misses to the encoder in
    /// one batched call. Output order matches `inputs`.
    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, FedibgsError> {
        let keys: Vec<String> = inputs.iter().map(|i| cache_key(i)).collect();
        let mut resolved: HashMap<&str, Vec<f32>> = HashMap::new();
        let mut misses: Vec<String> = Vec::new();
        let mut miss_keys: Vec<&str> = Vec::new();

        for (input, key) in inputs.iter().zip(&keys) {
            if resolved.contains_key(key.as_str()) || miss_keys.contains(&key.as_str()) {
                continue;
            }
            match self.lookup(key) {
                Some(hit) => {
                    resolved.insert(key.as_str(), hit);
                }
                None => {
                    misses.push(input.clone());
                    miss_keys.push(key.as_str());
                }
            }
        }

        if !misses.is_empty() {
            debug!(
                hits = resolved.len(),
                misses = misses.len(),
                "Embedding cache batch lookup"
            );
            let vectors = self.encoder.encode_boxed(&misses).await?;
            if vectors.len() != misses.len() {
                return Err(FedibgsError::Embedding(format!(
                    "Encoder returned {} vectors for {} inputs",
                    vectors.len(),
                    misses.len()
                )));
            }
            for (key, vector) in miss_keys.into_iter().zip(vectors) {
                self.store_vector(key, &vector);
                resolved.insert(key, vector);
            }
        }

        keys.iter()
            .map(|key| {
                resolved.get(key.as_str()).cloned().ok_or_else(|| {
                    FedibgsError::Embedding(format!("No vector resolved for {}", key))
                })
            })
            .collect()
    }

    fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        match self.store.get(key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "Embedding cache read failed");
                None
            }
        }
    }

    fn store_vector(&self, key: &str, vector: &[f32]) {
        if let Err(e) = self.store.put(key, vector) {
            warn!(key = %key, error = %e, "Embedding cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;
    use fedibgs_storage::Database;

    fn cache_with(mock: &MockEmbedding) -> (EmbeddingCache, Arc<MemoryCacheStore>) {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = EmbeddingCache::new(
            Arc::clone(&store) as Arc<dyn CacheStore>,
            Arc::new(mock.clone()),
        );
        (cache, store)
    }

    #[test]
    fn test_cache_key_is_sha256_hex() {
        assert_eq!(
            cache_key("hello"),
            "query:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_hit_skips_encoder() {
        let mock = MockEmbedding::with_dimensions(8);
        let (cache, store) = cache_with(&mock);

        let first = cache.embed("cats", true).await.unwrap();
        let second = cache.embed("cats", true).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.call_count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_bypass_recomputes_and_overwrites() {
        let mock = MockEmbedding::with_dimensions(4);
        let (cache, store) = cache_with(&mock);
        store.put(&cache_key("cats"), &[9.0, 9.0, 9.0, 9.0]).unwrap();

        assert_eq!(cache.embed("cats", true).await.unwrap(), vec![9.0; 4]);
        let fresh = cache.embed("cats", false).await.unwrap();

        assert_ne!(fresh, vec![9.0; 4]);
        assert_eq!(store.get(&cache_key("cats")).unwrap(), Some(fresh));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_sends_only_distinct_misses() {
        let mock = MockEmbedding::with_dimensions(4);
        let (cache, _store) = cache_with(&mock);
        cache.embed("known", true).await.unwrap();

        let inputs: Vec<String> = ["known", "new", "new", "other"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let vectors = cache.embed_batch(&inputs).await.unwrap();

        assert_eq!(vectors.len(), 4);
        assert_eq!(vectors[1], vectors[2]);
        assert_eq!(vectors[0], mock.hash_to_vector("known"));
        assert_eq!(vectors[3], mock.hash_to_vector("other"));
        // One call for "known", one batched call for the misses.
        assert_eq!(mock.call_count(), 2);

        cache.embed_batch(&inputs).await.unwrap();
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_encoder_failure_propagates() {
        let mock = MockEmbedding::failing();
        let (cache, store) = cache_with(&mock);

        assert!(cache.embed("anything", true).await.is_err());
        assert!(cache.embed_batch(&["a".to_string()]).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_store_backs_cache() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = Arc::new(EmbeddingCacheRepository::new(Arc::clone(&db)));
        let mock = MockEmbedding::with_dimensions(4);
        let cache = EmbeddingCache::new(
            Arc::clone(&repo) as Arc<dyn CacheStore>,
            Arc::new(mock.clone()),
        );

        let v = cache.embed("persisted", true).await.unwrap();
        assert_eq!(repo.get(&cache_key("persisted")).unwrap(), Some(v));
    }
}
