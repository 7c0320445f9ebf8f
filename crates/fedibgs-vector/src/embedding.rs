//! Embedding service trait and implementations.
//!
//! - `ClipHttpEncoder` talks to a CLIP-style inference service over HTTP.
//!   Text and image URIs share one vector space. This is the production
//!   backend.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use fedibgs_core::config::EmbeddingConfig;
use fedibgs_core::error::FedibgsError;

/// Contract of the inference collaborator: one vector per input, in order.
///
/// Inputs are either natural-language text or image URIs; implementations
/// decide how to tell them apart.
pub trait EmbeddingService: Send + Sync {
    fn encode(
        &self,
        inputs: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>, FedibgsError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// Because `EmbeddingService::encode` returns `impl Future` it is not
/// object-safe. This trait uses a boxed future instead, allowing
/// `Arc<dyn DynEmbeddingService>` to be shared without generics.
pub trait DynEmbeddingService: Send + Sync {
    fn encode_boxed<'a>(
        &'a self,
        inputs: &'a [String],
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<Vec<f32>>, FedibgsError>> + Send + 'a>,
    >;

    fn dimensions(&self) -> usize;
}

/// Blanket impl: any `EmbeddingService` automatically implements `DynEmbeddingService`.
impl<T: EmbeddingService> DynEmbeddingService for T {
    fn encode_boxed<'a>(
        &'a self,
        inputs: &'a [String],
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<Vec<f32>>, FedibgsError>> + Send + 'a>,
    > {
        Box::pin(self.encode(inputs))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

/// Whether an input should be sent to the encoder as a URI instead of text.
pub fn is_uri_input(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://") || input.starts_with("data:")
}

// ---------------------------------------------------------------------------
// ClipHttpEncoder - remote CLIP inference
// ---------------------------------------------------------------------------

/// HTTP client for a CLIP-style encoding service.
///
/// Posts `{"data": [{"text": ..} | {"uri": ..}], "execEndpoint": "/encode"}`
/// to `{endpoint}/post` and reads `data[i].embedding` from the response.
/// Large requests are split at the configured batch size.
#[derive(Debug, Clone)]
pub struct ClipHttpEncoder {
    client: Client,
    url: String,
    dimensions: usize,
    batch_size: usize,
}

impl ClipHttpEncoder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, FedibgsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FedibgsError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/post", config.endpoint.trim_end_matches('/')),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn encode_chunk(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, FedibgsError> {
        let request = EncodeRequest {
            data: inputs
                .iter()
                .map(|input| {
                    if is_uri_input(input) {
                        EncodeDocument::Uri { uri: input }
                    } else {
                        EncodeDocument::Text { text: input }
                    }
                })
                .collect(),
            exec_endpoint: "/encode",
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| FedibgsError::TransientUpstream(format!("Encoder request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(FedibgsError::TransientUpstream(format!(
                "Encoder returned {}: {}",
                status, body
            )));
        }

        let parsed: EncodeResponse = response
            .json()
            .await
            .map_err(|e| FedibgsError::Embedding(format!("Malformed encoder response: {}", e)))?;

        if parsed.data.len() != inputs.len() {
            return Err(FedibgsError::Embedding(format!(
                "Encoder returned {} embeddings for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }

        parsed
            .data
            .into_iter()
            .enumerate()
            .map(|(i, doc)| {
                doc.embedding.ok_or_else(|| {
                    FedibgsError::Embedding(format!("Encoder returned no embedding for input {}", i))
                })
            })
            .collect()
    }
}

impl EmbeddingService for ClipHttpEncoder {
    async fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, FedibgsError> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(self.batch_size) {
            debug!(inputs = chunk.len(), "Encoding batch");
            vectors.extend(self.encode_chunk(chunk).await?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Serialize)]
struct EncodeRequest<'a> {
    data: Vec<EncodeDocument<'a>>,
    #[serde(rename = "execEndpoint")]
    exec_endpoint: &'static str,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EncodeDocument<'a> {
    Text { text: &'a str },
    Uri { uri: &'a str },
}

#[derive(Deserialize)]
struct EncodeResponse {
    data: Vec<EncodedDocument>,
}

#[derive(Deserialize)]
struct EncodedDocument {
    embedding: Option<Vec<f32>>,
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic unit vectors.
///
/// The output is derived from a hash of the input, so identical inputs
/// always produce identical outputs. A failing mock rejects every call, and
/// every mock counts the encode calls it has served.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(512)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A mock whose every call fails as if the service were down.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Number of `encode` calls served so far, across clones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hash_to_vector(&self, input: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            input.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, FedibgsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(FedibgsError::TransientUpstream(
                "Mock encoder unavailable".to_string(),
            ));
        }
        if inputs.iter().any(|i| i.is_empty()) {
            return Err(FedibgsError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(inputs.iter().map(|i| self.hash_to_vector(i)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    fn inputs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_mock_embedding_dimension_and_determinism() {
        let service = MockEmbedding::with_dimensions(16);
        let v1 = service.encode(&inputs(&["same text"])).await.unwrap();
        let v2 = service.encode(&inputs(&["same text"])).await.unwrap();
        assert_eq!(v1[0].len(), 16);
        assert_eq!(v1, v2);
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_embedding_different_inputs() {
        let service = MockEmbedding::new();
        let v = service.encode(&inputs(&["text one", "text two"])).await.unwrap();
        assert_eq!(v.len(), 2);
        assert_ne!(v[0], v[1]);
        let norm: f32 = v[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_mock_embedding_rejects_empty_text() {
        let service = MockEmbedding::new();
        assert!(service.encode(&inputs(&[""])).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_mock_is_transient() {
        let service = MockEmbedding::failing();
        let err = service.encode(&inputs(&["x"])).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_uri_detection() {
        assert!(is_uri_input("https://cdn.example/a.png"));
        assert!(is_uri_input("data:image/png;base64,AAAA"));
        assert!(!is_uri_input("cdn.example/a.png"));
        assert!(!is_uri_input("data. not a uri"));
    }

    async fn spawn_encoder(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(endpoint: String, batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            endpoint,
            dimensions: 2,
            batch_size,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_clip_encoder_wire_format_and_batching() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::<Value>::new()));
        let seen_handler = Arc::clone(&seen);
        let app = Router::new().route(
            "/post",
            post(move |Json(body): Json<Value>| {
                let seen = Arc::clone(&seen_handler);
                async move {
                    let docs = body["data"].as_array().cloned().unwrap_or_default();
                    seen.lock().unwrap().push(body);
                    let data: Vec<Value> = docs
                        .iter()
                        .enumerate()
                        .map(|(i, _)| json!({"embedding": [i as f32, 1.0]}))
                        .collect();
                    Json(json!({ "data": data }))
                }
            }),
        );
        let endpoint = spawn_encoder(app).await;

        let encoder = ClipHttpEncoder::new(&config(endpoint, 2)).unwrap();
        let vectors = encoder
            .encode(&inputs(&["a cat", "https://cdn.example/cat.png", "a dog"]))
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![0.0, 1.0]]);

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["execEndpoint"], "/encode");
        assert_eq!(requests[0]["data"][0]["text"], "a cat");
        assert_eq!(requests[0]["data"][1]["uri"], "https://cdn.example/cat.png");
        assert!(requests[0]["data"][1].get("text").is_none());
    }

    #[tokio::test]
    async fn test_clip_encoder_server_error_is_transient() {
        let app = Router::new().route(
            "/post",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        );
        let endpoint = spawn_encoder(app).await;

        let encoder = ClipHttpEncoder::new(&config(endpoint, 8)).unwrap();
        let err = encoder.encode(&inputs(&["hello"])).await.unwrap_err();
        assert!(matches!(err, FedibgsError::TransientUpstream(_)));
    }

    #[tokio::test]
    async fn test_clip_encoder_count_mismatch() {
        let app = Router::new().route("/post", post(|| async { Json(json!({ "data": [] })) }));
        let endpoint = spawn_encoder(app).await;

        let encoder = ClipHttpEncoder::new(&config(endpoint, 8)).unwrap();
        let err = encoder.encode(&inputs(&["hello"])).await.unwrap_err();
        assert!(matches!(err, FedibgsError::Embedding(_)));
    }
}
