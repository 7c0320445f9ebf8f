//! Bounded in-process batch of normalized records.
//!
//! Records leave the buffer only after the queue confirms the enqueue. If
//! the queue keeps refusing, the buffer grows up to a hard limit and then
//! refuses new records.

use fedibgs_core::error::FedibgsError;
use fedibgs_core::types::CandidateRecord;

/// Pending records allowed per unit of capacity before the buffer refuses.
const OVERFLOW_FACTOR: usize = 4;

#[derive(Debug)]
pub struct BatchBuffer {
    records: Vec<CandidateRecord>,
    capacity: usize,
}

impl BatchBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record. Returns `true` when the buffer is due for a flush.
    pub fn push(&mut self, record: CandidateRecord) -> Result<bool, FedibgsError> {
        if self.records.len() >= self.max_pending() {
            return Err(FedibgsError::Queue(format!(
                "Batch buffer holds {} unconfirmed records",
                self.records.len()
            )));
        }
        self.records.push(record);
        Ok(self.is_full())
    }

    /// The pending records, cloned for an enqueue attempt.
    pub fn batch(&self) -> Vec<CandidateRecord> {
        self.records.clone()
    }

    /// Drop the first `count` records after the queue confirmed them.
    pub fn confirm(&mut self, count: usize) {
        let count = count.min(self.records.len());
        self.records.drain(..count);
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn max_pending(&self) -> usize {
        self.capacity * OVERFLOW_FACTOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fedibgs_core::types::AuthorRef;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn record(n: u128) -> CandidateRecord {
        CandidateRecord {
            id: Uuid::from_u128(n),
            content: format!("post {}", n),
            attachments: vec![],
            tags: BTreeSet::new(),
            author: AuthorRef {
                url: "https://x/@a".into(),
                username: "a".into(),
            },
            post_url: format!("https://x/{}", n),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_full_at_capacity() {
        let mut buffer = BatchBuffer::new(3);
        assert!(!buffer.push(record(1)).unwrap());
        assert!(!buffer.push(record(2)).unwrap());
        assert!(buffer.push(record(3)).unwrap());
        assert_eq!(buffer.batch().len(), 3);
    }

    #[test]
    fn test_unconfirmed_records_are_retained() {
        let mut buffer = BatchBuffer::new(2);
        buffer.push(record(1)).unwrap();
        buffer.push(record(2)).unwrap();
        let attempt = buffer.batch();

        // Enqueue failed: nothing is confirmed, the next push still flushes.
        assert!(buffer.push(record(3)).unwrap());
        assert_eq!(buffer.len(), 3);

        buffer.confirm(attempt.len());
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.batch()[0].id, Uuid::from_u128(3));
    }

    #[test]
    fn test_refuses_past_overflow_limit() {
        let mut buffer = BatchBuffer::new(1);
        for n in 0..4 {
            buffer.push(record(n)).unwrap();
        }
        assert!(matches!(buffer.push(record(9)), Err(FedibgsError::Queue(_))));
        assert_eq!(buffer.len(), 4);
    }
}
