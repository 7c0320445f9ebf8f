//! Batch queue between the Timeline Listener and the Batch Consumers.
//!
//! Delivery is at-least-once: a batch handed back through `requeue` is seen
//! again, and consumers must tolerate it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

use fedibgs_core::error::FedibgsError;
use fedibgs_core::types::CandidateRecord;

/// How often a waiting `dequeue` rechecks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One batch as taken off the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// 1 for the first delivery, incremented by each requeue.
    pub attempt: u32,
    pub records: Vec<CandidateRecord>,
}

#[async_trait]
pub trait BatchQueue: Send + Sync {
    /// Hand a batch to the queue. `Ok` means the queue owns it.
    async fn enqueue(&self, records: Vec<CandidateRecord>) -> Result<(), FedibgsError>;

    /// Wait for the next batch. `None` once the queue is closed, drained,
    /// and no taken delivery is still unsettled.
    async fn dequeue(&self) -> Option<Delivery>;

    /// Put a failed delivery back for another attempt. Never waits for
    /// space, and is accepted after `close` too.
    async fn requeue(&self, delivery: Delivery) -> Result<(), FedibgsError>;

    /// The consumer is finished with a delivery it took from `dequeue`,
    /// whether it was processed, requeued or dropped.
    fn settle(&self);

    /// Stop accepting new batches. Pending and in-flight batches remain.
    fn close(&self);
}

/// In-process queue carrying JSON-encoded batches.
///
/// New batches travel over a bounded channel, which gives the listener
/// backpressure. Redeliveries use a separate unbounded lane, so a consumer
/// never blocks on the queue it drains.
///
/// Messages are serialized the way a broker would carry them, so a record
/// that cannot round-trip fails at enqueue time rather than in a consumer.
pub struct MemoryQueue {
    sender: mpsc::Sender<String>,
    retry_sender: mpsc::UnboundedSender<String>,
    receivers: Mutex<Receivers>,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

struct Receivers {
    fresh: mpsc::Receiver<String>,
    retry: mpsc::UnboundedReceiver<String>,
}

impl Receivers {
    fn try_next(&mut self) -> Option<String> {
        self.retry.try_recv().ok().or_else(|| self.fresh.try_recv().ok())
    }
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, fresh) = mpsc::channel(capacity.max(1));
        let (retry_sender, retry) = mpsc::unbounded_channel();
        Self {
            sender,
            retry_sender,
            receivers: Mutex::new(Receivers { fresh, retry }),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Deliveries taken but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    async fn next_payload(&self, receivers: &mut Receivers) -> Option<String> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                // Read the counter before the lanes: a requeue lands in the
                // retry lane before its delivery is settled.
                let idle = self.in_flight.load(Ordering::Acquire) == 0;
                if let Some(payload) = receivers.try_next() {
                    return Some(payload);
                }
                if idle {
                    return None;
                }
                tokio::time::sleep(POLL_INTERVAL / 10).await;
                continue;
            }
            tokio::select! {
                biased;
                Some(payload) = receivers.retry.recv() => return Some(payload),
                Some(payload) = receivers.fresh.recv() => return Some(payload),
                _ = tokio::time::sleep(POLL_INTERVAL) => continue,
            }
        }
    }
}

#[async_trait]
impl BatchQueue for MemoryQueue {
    async fn enqueue(&self, records: Vec<CandidateRecord>) -> Result<(), FedibgsError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FedibgsError::ShuttingDown);
        }
        let count = records.len();
        let payload = serde_json::to_string(&Delivery {
            attempt: 1,
            records,
        })?;
        self.sender
            .send(payload)
            .await
            .map_err(|_| FedibgsError::Queue("Queue receiver dropped".to_string()))?;
        debug!(records = count, "Batch enqueued");
        Ok(())
    }

    async fn dequeue(&self) -> Option<Delivery> {
        let mut receivers = self.receivers.lock().await;
        loop {
            let payload = self.next_payload(&mut receivers).await?;
            match serde_json::from_str::<Delivery>(&payload) {
                Ok(delivery) => {
                    self.in_flight.fetch_add(1, Ordering::AcqRel);
                    return Some(delivery);
                }
                Err(e) => {
                    error!(error = %e, "Dropping undecodable batch");
                }
            }
        }
    }

    async fn requeue(&self, mut delivery: Delivery) -> Result<(), FedibgsError> {
        delivery.attempt += 1;
        let payload = serde_json::to_string(&delivery)?;
        self.retry_sender
            .send(payload)
            .map_err(|_| FedibgsError::Queue("Queue receiver dropped".to_string()))
    }

    fn settle(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
