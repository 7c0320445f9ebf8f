//! Ingestion pipeline for FediBGS.
//!
//! Reads the federated timeline stream, filters and canonicalizes statuses,
//! buffers them into batches for the queue, watches the stream for stalls,
//! and writes queued batches into the store with embeddings attached.

pub mod activity;
pub mod buffer;
pub mod consumer;
pub mod listener;
pub mod markup;
pub mod queue;
pub mod resolver;
pub mod stream;
pub mod watchdog;
pub mod worker;

pub use activity::{ActivitySignal, ActivitySnapshot};
pub use buffer::BatchBuffer;
pub use consumer::{AuthorCache, BatchConsumer, BatchReport};
pub use listener::{check_filters, Rejection, TimelineListener};
pub use queue::{BatchQueue, Delivery, MemoryQueue};
pub use resolver::{AttachmentResolver, HttpAttachmentResolver};
pub use stream::{connect, decode_events, EventStream, SseDecoder};
pub use watchdog::{Watchdog, WatchdogAction};
pub use worker::{BatchProcessor, ConsumerWorker, WorkerStats};
