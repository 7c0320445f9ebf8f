//! Persistent key/vector table behind the embedding cache.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use fedibgs_core::error::FedibgsError;

use crate::codec::{decode_vector, encode_vector};
use crate::db::{storage_err, Database};

/// Unbounded, never-evicted store of embedding vectors by key.
pub struct EmbeddingCacheRepository {
    db: Arc<Database>,
}

impl EmbeddingCacheRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<f32>>, FedibgsError> {
        self.db.with_conn(|conn| {
            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT vector FROM embedding_cache WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)?;
            blob.as_deref().map(decode_vector).transpose()
        })
    }

    /// Insert or overwrite the vector stored under `key`.
    pub fn put(&self, key: &str, vector: &[f32]) -> Result<(), FedibgsError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO embedding_cache (key, vector) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET vector = excluded.vector",
                rusqlite::params![key, encode_vector(vector)],
            )
            .map_err(storage_err)?;
            Ok(())
        })
    }

    pub fn len(&self) -> Result<u64, FedibgsError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))
                .map_err(storage_err)?;
            Ok(count as u64)
        })
    }

    pub fn is_empty(&self) -> Result<bool, FedibgsError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put_overwrite() {
        let repo = EmbeddingCacheRepository::new(Arc::new(Database::in_memory().unwrap()));
        assert!(repo.is_empty().unwrap());
        assert_eq!(repo.get("query:abc").unwrap(), None);

        repo.put("query:abc", &[1.0, 2.0]).unwrap();
        assert_eq!(repo.get("query:abc").unwrap(), Some(vec![1.0, 2.0]));

        repo.put("query:abc", &[3.0]).unwrap();
        assert_eq!(repo.get("query:abc").unwrap(), Some(vec![3.0]));
        assert_eq!(repo.len().unwrap(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let repo = EmbeddingCacheRepository::new(Arc::new(Database::new(&path).unwrap()));
            repo.put("query:k", &[0.5]).unwrap();
        }
        let repo = EmbeddingCacheRepository::new(Arc::new(Database::new(&path).unwrap()));
        assert_eq!(repo.get("query:k").unwrap(), Some(vec![0.5]));
    }
}
