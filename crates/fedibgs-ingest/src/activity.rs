//! Liveness signal shared between the Timeline Listener and the Watchdog.
//!
//! Only the listener writes; the watchdog only reads. All fields are
//! atomics so neither side takes a lock.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct ActivitySignal {
    origin: Instant,
    /// Milliseconds since `origin` of the last accepted record or flush.
    last_activity_ms: AtomicU64,
    accepted: AtomicU64,
    flushed: AtomicU64,
    buffered: AtomicUsize,
}

/// Point-in-time copy of the counters, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub accepted: u64,
    pub flushed: u64,
    pub buffered: usize,
}

impl Default for ActivitySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySignal {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            buffered: AtomicUsize::new(0),
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(now, Ordering::Release);
    }

    /// A record passed the filter chain and entered the buffer.
    pub fn record_accepted(&self, buffered: usize) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.buffered.store(buffered, Ordering::Relaxed);
        self.touch();
    }

    /// A batch of `count` records was confirmed by the queue.
    pub fn record_flush(&self, count: usize, buffered: usize) {
        self.flushed.fetch_add(count as u64, Ordering::Relaxed);
        self.buffered.store(buffered, Ordering::Relaxed);
        self.touch();
    }

    /// Time since the last accepted record or flush.
    pub fn idle(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        let last = self.last_activity_ms.load(Ordering::Acquire);
        Duration::from_millis(now.saturating_sub(last))
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        ActivitySnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_idle_grows_and_resets() {
        let signal = ActivitySignal::new();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(signal.idle(), Duration::from_secs(3));

        signal.record_accepted(1);
        assert_eq!(signal.idle(), Duration::ZERO);

        tokio::time::advance(Duration::from_millis(1500)).await;
        signal.record_flush(1, 0);
        assert_eq!(signal.idle(), Duration::ZERO);

        let snap = signal.snapshot();
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.flushed, 1);
        assert_eq!(snap.buffered, 0);
    }
}
