use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the FediBGS system.
///
/// The variants follow the ingestion failure taxonomy: transient upstream
/// faults are retried or skipped, malformed records and constraint
/// violations are absorbed by the pipeline, fatal stream errors end the
/// ingestion process, and task failures hand a batch back to the queue.
/// Duplicate records are not errors at all and never appear here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FedibgsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A unique or primary-key constraint rejected a write.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Network fault talking to the stream source or the inference service.
    #[error("Upstream unavailable: {0}")]
    TransientUpstream(String),

    /// An inbound record is missing required fields or cannot be decoded.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// The timeline connection aborted, errored, or went silent.
    #[error("Fatal stream error: {0}")]
    FatalStream(String),

    /// Unhandled fault while processing a queued batch.
    #[error("Task failure on record {record_id}: {message}")]
    TaskFailure { record_id: Uuid, message: String },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl FedibgsError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FedibgsError::TransientUpstream(_) | FedibgsError::Embedding(_) | FedibgsError::Storage(_)
        )
    }
}

impl From<toml::de::Error> for FedibgsError {
    fn from(err: toml::de::Error) -> Self {
        FedibgsError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for FedibgsError {
    fn from(err: toml::ser::Error) -> Self {
        FedibgsError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for FedibgsError {
    fn from(err: serde_json::Error) -> Self {
        FedibgsError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for FediBGS operations.
pub type Result<T> = std::result::Result<T, FedibgsError>;
