//! Consumer workers: pull batches off the queue and hand them to a
//! [`BatchProcessor`], requeueing failures with a linear backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};

use fedibgs_core::config::ConsumerConfig;
use fedibgs_core::error::Result;
use fedibgs_core::types::CandidateRecord;

use crate::consumer::BatchReport;
use crate::queue::{BatchQueue, Delivery};

#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process_batch(&self, records: &[CandidateRecord]) -> Result<BatchReport>;
}

/// Totals for one worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub batches: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub requeued: usize,
    pub dropped: usize,
}

pub struct ConsumerWorker {
    id: usize,
    queue: Arc<dyn BatchQueue>,
    processor: Arc<dyn BatchProcessor>,
    max_retries: u32,
    backoff: Duration,
}

impl ConsumerWorker {
    pub fn new(
        id: usize,
        queue: Arc<dyn BatchQueue>,
        processor: Arc<dyn BatchProcessor>,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            id,
            queue,
            processor,
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Process batches until the queue is closed and drained.
    ///
    /// A delivery is settled only after it was processed, requeued or
    /// dropped, so a batch waiting out its backoff keeps the queue open.
    pub async fn run(self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!(worker = self.id, "Consumer worker started");

        while let Some(delivery) = self.queue.dequeue().await {
            stats.batches += 1;
            match self.processor.process_batch(&delivery.records).await {
                Ok(report) => {
                    stats.stored += report.stored;
                    stats.duplicates += report.duplicates;
                    debug!(
                        worker = self.id,
                        attempt = delivery.attempt,
                        stored = report.stored,
                        duplicates = report.duplicates,
                        "Batch processed"
                    );
                }
                Err(e) => {
                    error!(
                        worker = self.id,
                        attempt = delivery.attempt,
                        records = delivery.records.len(),
                        error = %e,
                        "Batch failed"
                    );
                    if self.retry(delivery).await {
                        stats.requeued += 1;
                    } else {
                        stats.dropped += 1;
                    }
                }
            }
            self.queue.settle();
        }

        info!(
            worker = self.id,
            batches = stats.batches,
            stored = stats.stored,
            duplicates = stats.duplicates,
            "Consumer worker stopped"
        );
        stats
    }

    /// Requeue a failed delivery after `backoff * attempt`, or drop it once
    /// it has used up its retries. Returns whether it was requeued.
    async fn retry(&self, delivery: Delivery) -> bool {
        if delivery.attempt > self.max_retries {
            error!(
                worker = self.id,
                attempts = delivery.attempt,
                record_ids = ?record_ids(&delivery),
                "Dropping batch after exhausting retries"
            );
            return false;
        }

        tokio::time::sleep(self.backoff * delivery.attempt).await;
        let ids = record_ids(&delivery);
        match self.queue.requeue(delivery).await {
            Ok(()) => true,
            Err(e) => {
                error!(worker = self.id, error = %e, record_ids = ?ids, "Requeue refused, batch lost");
                false
            }
        }
    }
}

fn record_ids(delivery: &Delivery) -> Vec<String> {
    delivery.records.iter().map(|r| r.id.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use chrono::Utc;
    use fedibgs_core::error::FedibgsError;
    use fedibgs_core::types::AuthorRef;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Fails the first `failures` calls, then succeeds.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchProcessor for Flaky {
        async fn process_batch(&self, records: &[CandidateRecord]) -> Result<BatchReport> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(FedibgsError::TaskFailure {
                    record_id: records[0].id,
                    message: "store offline".to_string(),
                });
            }
            Ok(BatchReport {
                stored: records.len(),
                duplicates: 0,
            })
        }
    }

    fn record() -> CandidateRecord {
        CandidateRecord {
            id: Uuid::from_u128(7),
            content: "hello".to_string(),
            attachments: vec![],
            tags: BTreeSet::new(),
            author: AuthorRef {
                url: "https://x/@a".to_string(),
                username: "a".to_string(),
            },
            post_url: "https://x/7".to_string(),
            observed_at: Utc::now(),
        }
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig {
            workers: 1,
            max_retries: 2,
            retry_backoff_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_failed_batch_is_retried_until_it_succeeds() {
        let queue = Arc::new(MemoryQueue::new(4));
        let processor = Arc::new(Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        queue.enqueue(vec![record()]).await.unwrap();

        let worker = ConsumerWorker::new(0, queue.clone(), processor.clone(), &config());
        let handle = tokio::spawn(worker.run());

        while processor.calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        queue.close();
        let stats = handle.await.unwrap();

        assert_eq!(stats.stored, 1);
        assert_eq!(stats.requeued, 2);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn test_batch_dropped_after_max_retries() {
        let queue = Arc::new(MemoryQueue::new(4));
        let processor = Arc::new(Flaky {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        queue.enqueue(vec![record()]).await.unwrap();

        let worker = ConsumerWorker::new(0, queue.clone(), processor.clone(), &config());
        let handle = tokio::spawn(worker.run());

        // First delivery plus two redeliveries.
        while processor.calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        queue.close();
        let stats = handle.await.unwrap();

        assert_eq!(stats.requeued, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
    }

    fn always_failing() -> Arc<Flaky> {
        Arc::new(Flaky {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_retries_or_shutdown() {
        let queue = Arc::new(MemoryQueue::new(1));
        let processor = always_failing();
        queue.enqueue(vec![record()]).await.unwrap();

        let worker = ConsumerWorker::new(0, queue.clone(), processor.clone(), &config());
        let handle = tokio::spawn(worker.run());
        while processor.calls.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Fill the bounded lane while the first batch is being retried.
        queue.enqueue(vec![record()]).await.unwrap();
        tokio::time::timeout(Duration::from_secs(3), queue.enqueue(vec![record()]))
            .await
            .expect("final enqueue blocked behind a retrying worker")
            .unwrap();

        queue.close();
        let stats = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("worker did not finish after close")
            .unwrap();

        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.requeued, 6);
        assert_eq!(stats.batches, 9);
    }

    #[tokio::test]
    async fn test_close_during_backoff_keeps_retrying() {
        let queue = Arc::new(MemoryQueue::new(4));
        let processor = always_failing();
        queue.enqueue(vec![record()]).await.unwrap();
        let config = ConsumerConfig {
            retry_backoff_ms: 50,
            ..config()
        };

        let worker = ConsumerWorker::new(0, queue.clone(), processor.clone(), &config);
        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        let stats = handle.await.unwrap();

        assert_eq!(stats.batches, 3);
        assert_eq!(stats.requeued, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_two_workers_drain_a_retried_batch_after_close() {
        let queue = Arc::new(MemoryQueue::new(4));
        let processor = Arc::new(Flaky {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        queue.enqueue(vec![record()]).await.unwrap();

        let handles: Vec<_> = (0..2)
            .map(|id| {
                let worker = ConsumerWorker::new(id, queue.clone(), processor.clone(), &config());
                tokio::spawn(worker.run())
            })
            .collect();
        while processor.calls.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        queue.close();

        let mut stored = 0;
        for handle in handles {
            stored += handle.await.unwrap().stored;
        }
        assert_eq!(stored, 1);
    }
}
