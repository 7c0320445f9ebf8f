use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FedibgsError, Result};

/// Top-level configuration for FediBGS.
///
/// Loaded from `~/.fedibgs/config.toml` by default. Each section corresponds
/// to one component of the ingestion or serving path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FedibgsConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl FedibgsConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FedibgsConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| FedibgsError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// API server port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.fedibgs/data".to_string(),
            log_level: "info".to_string(),
            port: 8000,
        }
    }
}

/// Upstream federated timeline connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Base URL of the instance or relay serving the streaming API.
    pub base_url: String,
    /// Path of the public timeline stream.
    pub path: String,
    /// Optional bearer token for instances that require authentication.
    pub access_token: Option<String>,
    /// User-Agent sent on the stream connection and attachment probes.
    pub user_agent: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fedi.buzz".to_string(),
            path: "/api/v1/streaming/public".to_string(),
            access_token: None,
            user_agent: format!("FediBGS/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl StreamConfig {
    /// Full URL of the timeline stream endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
    }
}

/// Timeline Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Records buffered before a batch is handed to the queue.
    pub buffer_capacity: usize,
    /// Timeout for the attachment HEAD probe, in milliseconds.
    pub probe_timeout_ms: u64,
    /// How long the final flush at shutdown may wait for queue space.
    pub shutdown_flush_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 32,
            probe_timeout_ms: 2000,
            shutdown_flush_timeout_ms: 5000,
        }
    }
}

impl ListenerConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn shutdown_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_flush_timeout_ms)
    }
}

/// Liveness watchdog thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Silence after which a stall warning is logged, repeated at this period.
    pub warn_after_secs: u64,
    /// Silence after which the ingestion process is terminated.
    pub terminate_after_secs: u64,
    /// How often the activity signal is sampled, in milliseconds.
    pub check_interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            warn_after_secs: 5,
            terminate_after_secs: 30,
            check_interval_ms: 1000,
        }
    }
}

/// In-process batch queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of batches waiting for a consumer.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// Batch Consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Number of concurrent consumer workers pulling from the queue.
    pub workers: usize,
    /// Redeliveries of a failed batch before it is dropped.
    pub max_retries: u32,
    /// Base backoff between redeliveries, multiplied by the attempt number.
    pub retry_backoff_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Embedding inference collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend: "clip-http" or "mock".
    pub backend: String,
    /// Base URL of the inference service.
    pub endpoint: String,
    /// Embedding dimension produced by the model.
    pub dimensions: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum inputs per inference call.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "clip-http".to_string(),
            endpoint: "http://localhost:51000".to_string(),
            dimensions: 512,
            timeout_secs: 30,
            batch_size: 128,
        }
    }
}

/// Search result caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Result cap for hybrid and semantic modes.
    pub hybrid_limit: usize,
    /// Page size for lexical browse mode.
    pub page_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hybrid_limit: 25,
            page_size: 50,
        }
    }
}

/// HTTP API and live stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Live stream polling interval in milliseconds.
    pub stream_interval_ms: u64,
    /// Rolling window for the stats endpoint, in days.
    pub stats_window_days: i64,
    /// How long computed stats are reused, in seconds.
    pub stats_ttl_secs: u64,
    /// Maximum authors returned by author search.
    pub author_search_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            stream_interval_ms: 1000,
            stats_window_days: 7,
            stats_ttl_secs: 300,
            author_search_limit: 20,
        }
    }
}
