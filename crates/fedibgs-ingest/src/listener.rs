//! Timeline Listener: the single sequential reader of the inbound stream.
//!
//! Each update runs through the filter chain, has its attachments resolved,
//! and is buffered. Full buffers are handed to the queue; records leave the
//! buffer only once the queue accepts them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use fedibgs_core::error::{FedibgsError, Result};
use fedibgs_core::events::{RawStatus, StreamEvent};
use fedibgs_core::identity::post_id;
use fedibgs_core::types::{AttachmentCandidate, AuthorRef, CandidateRecord};

use crate::activity::ActivitySignal;
use crate::buffer::BatchBuffer;
use crate::markup::strip_tags;
use crate::queue::BatchQueue;
use crate::resolver::AttachmentResolver;

/// Why a status was not turned into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingField(&'static str),
    Boost,
    Reply,
    Empty,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingField(field) => write!(f, "missing field `{}`", field),
            Rejection::Boost => f.write_str("boost"),
            Rejection::Reply => f.write_str("reply"),
            Rejection::Empty => f.write_str("no content and no attachments"),
        }
    }
}

/// The filter chain, in order, short-circuiting on the first rejection.
pub fn check_filters(status: &RawStatus) -> std::result::Result<(), Rejection> {
    if status.id.is_none() {
        return Err(Rejection::MissingField("id"));
    }
    let Some(content) = status.content.as_deref() else {
        return Err(Rejection::MissingField("content"));
    };
    if status.is_boost() {
        return Err(Rejection::Boost);
    }
    if status.is_reply() {
        return Err(Rejection::Reply);
    }
    if content.trim().is_empty() && status.media_attachments.is_empty() {
        return Err(Rejection::Empty);
    }
    Ok(())
}

pub struct TimelineListener {
    resolver: Arc<dyn AttachmentResolver>,
    queue: Arc<dyn BatchQueue>,
    buffer: BatchBuffer,
    activity: Arc<ActivitySignal>,
}

impl TimelineListener {
    pub fn new(
        resolver: Arc<dyn AttachmentResolver>,
        queue: Arc<dyn BatchQueue>,
        activity: Arc<ActivitySignal>,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            resolver,
            queue,
            buffer: BatchBuffer::new(buffer_capacity),
            activity,
        }
    }

    /// Records waiting for a confirmed enqueue.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Filter a status and build its candidate record.
    ///
    /// Attachment probes run here, one at a time, each bounded by the
    /// resolver's timeout.
    pub async fn normalize(
        &self,
        status: RawStatus,
    ) -> std::result::Result<CandidateRecord, Rejection> {
        check_filters(&status)?;

        let post_url = status
            .url
            .filter(|u| !u.is_empty())
            .ok_or(Rejection::MissingField("url"))?;
        let account = status.account.ok_or(Rejection::MissingField("account"))?;
        let content = status.content.unwrap_or_default();

        let mut attachments: Vec<AttachmentCandidate> = Vec::new();
        for raw in status.media_attachments.iter().filter(|a| a.is_image()) {
            let Some(url) = raw.preferred_url() else {
                continue;
            };
            let Some(canonical) = self.resolver.resolve(url).await else {
                continue;
            };
            if attachments.iter().any(|a| a.url == canonical) {
                continue;
            }
            attachments.push(AttachmentCandidate {
                url: canonical,
                description: raw.description.clone().filter(|d| !d.trim().is_empty()),
                embedding: None,
            });
        }

        // Every attachment may have failed its probe.
        if attachments.is_empty() && strip_tags(&content).is_empty() {
            return Err(Rejection::Empty);
        }

        let tags = status
            .tags
            .into_iter()
            .map(|t| t.name)
            .filter(|name| !name.is_empty())
            .collect();

        Ok(CandidateRecord {
            id: post_id(&post_url),
            content,
            attachments,
            tags,
            author: AuthorRef {
                url: account.url,
                username: account.username,
            },
            post_url,
            observed_at: Utc::now(),
        })
    }

    /// Read events until the stream aborts, errors, or ends.
    ///
    /// Always returns an error: a healthy timeline never ends, so any exit
    /// is fatal for the ingestion process. Undecodable statuses are logged
    /// and skipped.
    pub async fn run<S>(&mut self, mut events: S) -> Result<()>
    where
        S: Stream<Item = StreamEvent> + Unpin,
    {
        while let Some(event) = events.next().await {
            match event {
                StreamEvent::Update(payload) => self.handle_update(&payload).await?,
                StreamEvent::Abort(reason) => {
                    return Err(FedibgsError::FatalStream(format!(
                        "Stream aborted: {}",
                        reason
                    )))
                }
                StreamEvent::Error(reason) => {
                    return Err(FedibgsError::FatalStream(format!("Stream error: {}", reason)))
                }
            }
        }
        Err(FedibgsError::FatalStream("Stream ended".to_string()))
    }

    async fn handle_update(&mut self, payload: &str) -> Result<()> {
        let status: RawStatus = match serde_json::from_str(payload) {
            Ok(status) => status,
            Err(e) => {
                let err = FedibgsError::MalformedRecord(e.to_string());
                warn!(error = %err, "Dropping undecodable status");
                return Ok(());
            }
        };

        match self.normalize(status).await {
            Ok(record) => self.accept(record).await,
            Err(rejection @ Rejection::MissingField(_)) => {
                let err = FedibgsError::MalformedRecord(rejection.to_string());
                warn!(error = %err, "Dropping status");
                Ok(())
            }
            Err(rejection) => {
                debug!(reason = %rejection, "Status filtered");
                Ok(())
            }
        }
    }

    /// Buffer a normalized record, flushing when the buffer is full.
    pub async fn accept(&mut self, record: CandidateRecord) -> Result<()> {
        debug!(post_id = %record.id, url = %record.post_url, "Record accepted");
        let due = self.buffer.push(record)?;
        self.activity.record_accepted(self.buffer.len());
        if due {
            self.flush().await?;
        }
        Ok(())
    }

    /// Hand the buffered records to the queue.
    ///
    /// On a refused enqueue the records stay buffered for the next attempt.
    /// Returns the number of records the queue accepted.
    pub async fn flush(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let batch = self.buffer.batch();
        let count = batch.len();
        match self.queue.enqueue(batch).await {
            Ok(()) => {
                self.buffer.confirm(count);
                self.activity.record_flush(count, self.buffer.len());
                info!(records = count, "Batch flushed to queue");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, buffered = self.buffer.len(), "Enqueue failed, keeping batch");
                Ok(0)
            }
        }
    }

    /// The last flush before shutdown, bounded by `limit` so a full queue
    /// cannot hold the process open. Unaccepted records stay buffered.
    pub async fn flush_within(&mut self, limit: Duration) -> Result<usize> {
        match tokio::time::timeout(limit, self.flush()).await {
            Ok(flushed) => flushed,
            Err(_) => Err(FedibgsError::Queue(format!(
                "Queue did not accept the final batch within {:?}",
                limit
            ))),
        }
    }
}
