//! Batch Consumer: turns queued candidate records into committed posts.
//!
//! Records are independent. Each one is checked for existence, has its
//! author resolved, its content stripped and embedded, and is written in
//! its own transaction, so a batch that fails halfway can be redelivered
//! and reprocessed without duplicating anything already committed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fedibgs_core::error::{FedibgsError, Result};
use fedibgs_core::identity::is_embeddable_image_url;
use fedibgs_core::types::{
    Author, AuthorRef, CandidateRecord, NewAttachment, NewPost, PersistOutcome,
};
use fedibgs_storage::{AuthorRepository, Database, PostRepository};
use fedibgs_vector::EmbeddingCache;

use crate::markup::{embedding_text, strip_tags};
use crate::worker::BatchProcessor;

/// Process-local map from author URL to the stored author.
///
/// Entries are never invalidated for the life of the process. Authors are
/// append-only, so the only staleness is a username changed upstream after
/// first sighting.
#[derive(Debug, Default)]
pub struct AuthorCache {
    entries: RwLock<HashMap<String, Author>>,
}

impl AuthorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<Author> {
        self.entries.read().ok()?.get(url).cloned()
    }

    pub fn insert(&self, author: Author) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(author.url.clone(), author);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub stored: usize,
    pub duplicates: usize,
}

/// A record with its storage text and embedding inputs worked out.
struct Prepared<'a> {
    record: &'a CandidateRecord,
    content: String,
    text_input: Option<String>,
    attachment_inputs: Vec<Option<String>>,
}

impl<'a> Prepared<'a> {
    fn new(record: &'a CandidateRecord) -> Self {
        let content = strip_tags(&record.content);
        let text_input = embedding_text(&content);
        let attachment_inputs = record
            .attachments
            .iter()
            .map(|a| {
                if a.embedding.is_none() && is_embeddable_image_url(&a.url) {
                    Some(a.url.clone())
                } else {
                    None
                }
            })
            .collect();
        Self {
            record,
            content,
            text_input,
            attachment_inputs,
        }
    }

    fn inputs(&self) -> impl Iterator<Item = &String> {
        self.text_input
            .iter()
            .chain(self.attachment_inputs.iter().flatten())
    }
}

pub struct BatchConsumer {
    authors: AuthorRepository,
    posts: PostRepository,
    author_cache: AuthorCache,
    embeddings: Arc<EmbeddingCache>,
}

impl BatchConsumer {
    pub fn new(db: Arc<Database>, embeddings: Arc<EmbeddingCache>) -> Self {
        Self {
            authors: AuthorRepository::new(Arc::clone(&db)),
            posts: PostRepository::new(db),
            author_cache: AuthorCache::new(),
            embeddings,
        }
    }

    pub fn author_cache(&self) -> &AuthorCache {
        &self.author_cache
    }

    /// Process one delivered batch.
    ///
    /// Records already committed (by an earlier delivery or a concurrent
    /// consumer) count as duplicates. The first unexpected fault stops the
    /// batch and is returned as [`FedibgsError::TaskFailure`]; records
    /// committed before it stay committed.
    pub async fn process_batch(&self, records: &[CandidateRecord]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut fresh: Vec<&CandidateRecord> = Vec::with_capacity(records.len());

        for record in records {
            if !seen.insert(record.id) {
                report.duplicates += 1;
                continue;
            }
            if self.posts.exists(record.id).map_err(|e| task_failure(record.id, e))? {
                info!(post_id = %record.id, "Post already indexed, skipping");
                report.duplicates += 1;
                continue;
            }
            fresh.push(record);
        }

        if fresh.is_empty() {
            return Ok(report);
        }

        let prepared: Vec<Prepared> = fresh.into_iter().map(Prepared::new).collect();
        let vectors = self.embed_inputs(&prepared).await;

        for item in &prepared {
            let record = item.record;
            let author = self
                .resolve_author(&record.author)
                .map_err(|e| task_failure(record.id, e))?;

            let post = NewPost {
                id: record.id,
                content: item.content.clone(),
                embedding: item.text_input.as_ref().and_then(|t| vectors.get(t).cloned()),
                post_url: record.post_url.clone(),
                tags: record.tags.iter().cloned().collect(),
                author_id: author.id,
            };
            let attachments: Vec<NewAttachment> = record
                .attachments
                .iter()
                .zip(&item.attachment_inputs)
                .map(|(a, input)| NewAttachment {
                    url: a.url.clone(),
                    description: a.description.clone(),
                    embedding: a
                        .embedding
                        .clone()
                        .or_else(|| input.as_ref().and_then(|u| vectors.get(u).cloned())),
                })
                .collect();

            match self
                .posts
                .insert(&post, &attachments)
                .map_err(|e| task_failure(record.id, e))?
            {
                PersistOutcome::Stored => {
                    report.stored += 1;
                    info!(
                        post_id = %record.id,
                        author = %author.username,
                        attachments = attachments.len(),
                        embedded = post.embedding.is_some(),
                        "Post indexed"
                    );
                }
                PersistOutcome::Duplicate => {
                    report.duplicates += 1;
                    info!(post_id = %record.id, "Post committed concurrently, skipping");
                }
            }
        }

        Ok(report)
    }

    /// Cache first, then the store, then insert-if-absent. The result is
    /// cached either way.
    fn resolve_author(&self, author: &AuthorRef) -> Result<Author> {
        if let Some(hit) = self.author_cache.get(&author.url) {
            return Ok(hit);
        }
        let stored = match self.authors.find_by_url(&author.url)? {
            Some(found) => found,
            None => {
                debug!(url = %author.url, "New author");
                self.authors.insert_if_absent(author)?
            }
        };
        self.author_cache.insert(stored.clone());
        Ok(stored)
    }

    /// Embed every distinct input of the batch.
    ///
    /// Embeddings are optional here: a transient batch failure falls back to
    /// one call per input, and inputs that still fail are simply absent from
    /// the returned map. Any other failure skips embedding for the batch.
    async fn embed_inputs(&self, prepared: &[Prepared<'_>]) -> HashMap<String, Vec<f32>> {
        let mut inputs: Vec<String> = Vec::new();
        for input in prepared.iter().flat_map(|p| p.inputs()) {
            if !inputs.contains(input) {
                inputs.push(input.clone());
            }
        }
        if inputs.is_empty() {
            return HashMap::new();
        }

        let batch = self.embeddings.embed_batch(&inputs).await;
        match batch {
            Ok(vectors) => return inputs.into_iter().zip(vectors).collect(),
            Err(e) if e.is_transient() => {
                warn!(inputs = inputs.len(), error = %e, "Batch embedding failed, retrying per input");
            }
            Err(e) => {
                warn!(inputs = inputs.len(), error = %e, "Embedding unavailable, storing batch without vectors");
                return HashMap::new();
            }
        }

        let mut vectors = HashMap::new();
        for input in inputs {
            match self.embeddings.embed(&input, true).await {
                Ok(vector) => {
                    vectors.insert(input, vector);
                }
                Err(e) => {
                    warn!(error = %e, "Embedding unavailable, storing without vector");
                }
            }
        }
        vectors
    }
}

#[async_trait]
impl BatchProcessor for BatchConsumer {
    async fn process_batch(&self, records: &[CandidateRecord]) -> Result<BatchReport> {
        BatchConsumer::process_batch(self, records).await
    }
}

fn task_failure(record_id: Uuid, err: FedibgsError) -> FedibgsError {
    FedibgsError::TaskFailure {
        record_id,
        message: err.to_string(),
    }
}
