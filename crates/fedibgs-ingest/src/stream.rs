//! Server-sent events client for the public timeline stream.
//!
//! The connection yields a [`StreamEvent`] per `update` frame. When the
//! upstream closes the body the stream yields `Abort`; when the transport
//! fails it yields `Error`. Both are the last item of the stream.

use std::collections::VecDeque;
use std::fmt::Display;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use fedibgs_core::config::StreamConfig;
use fedibgs_core::error::{FedibgsError, Result};
use fedibgs_core::events::StreamEvent;

pub type EventStream = BoxStream<'static, StreamEvent>;

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes may arrive split anywhere, including mid-line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            let line = text.strip_suffix('\r').unwrap_or(text.as_str());
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<StreamEvent> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if data.is_empty() {
            return None;
        }

        match event.as_deref() {
            Some("update") => Some(StreamEvent::Update(data.join("\n"))),
            Some(other) => {
                debug!(event = other, "Ignoring stream event");
                None
            }
            None => None,
        }
    }
}

struct DecodeState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

/// Turn a byte stream into timeline events.
pub fn decode_events<S, B, E>(bytes: S) -> EventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.feed(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.push_back(StreamEvent::Error(e.to_string()));
                }
                None => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(StreamEvent::Abort("Stream closed by upstream".to_string()));
                }
            }
        }
    })
    .boxed()
}

/// Open the timeline stream.
///
/// Connection failures and non-200 responses are fatal: the supervisor
/// restarts the process rather than spinning on a dead upstream.
pub async fn connect(config: &StreamConfig) -> Result<EventStream> {
    let client = Client::builder()
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| FedibgsError::Config(format!("Failed to build stream client: {}", e)))?;

    let endpoint = config.endpoint();
    let mut request = client.get(&endpoint).header(ACCEPT, "text/event-stream");

    match config.access_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => {
            info!(endpoint = %endpoint, token = %redact(token), "Connecting to timeline stream");
            request = request.bearer_auth(token);
        }
        None => info!(endpoint = %endpoint, "Connecting to timeline stream"),
    }

    let response = request.send().await.map_err(|e| {
        FedibgsError::FatalStream(format!("Failed to connect to {}: {}", endpoint, e))
    })?;

    if response.status() != StatusCode::OK {
        return Err(FedibgsError::FatalStream(format!(
            "Stream endpoint returned {}",
            response.status()
        )));
    }

    info!(endpoint = %endpoint, "Timeline stream connected");
    Ok(decode_events(response.bytes_stream()))
}

/// Keep only the first and last characters of a secret.
pub(crate) fn redact(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "***".to_string();
    }
    format!("{}***{}", chars[0], chars[chars.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;

    #[test]
    fn test_frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: upd").is_empty());
        assert!(decoder.feed(b"ate\r\ndata: {\"id\":").is_empty());
        let events = decoder.feed(b"\"1\"}\r\n\r\n");
        assert_eq!(events, vec![StreamEvent::Update("{\"id\":\"1\"}".to_string())]);
    }

    #[test]
    fn test_other_events_and_comments_are_ignored() {
        let mut decoder = SseDecoder::new();
        let body = b":thump\n\nevent: delete\ndata: 42\n\nevent: update\ndata: a\ndata: b\n\n";
        assert_eq!(
            decoder.feed(body),
            vec![StreamEvent::Update("a\nb".to_string())]
        );
    }

    #[tokio::test]
    async fn test_decode_ends_with_abort() {
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> =
            vec![Ok(b"event: update\ndata: x\n\n".to_vec())];
        let events: Vec<StreamEvent> = decode_events(stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Update("x".to_string()));
        assert!(matches!(events[1], StreamEvent::Abort(_)));
    }

    #[tokio::test]
    async fn test_decode_transport_failure_is_error() {
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"event: update\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let events: Vec<StreamEvent> = decode_events(stream::iter(chunks)).collect().await;

        assert_eq!(events, vec![StreamEvent::Error("reset".to_string())]);
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("abcdefgh"), "a***h");
        assert_eq!(redact("abc"), "***");
    }

    async fn timeline(headers: HeaderMap) -> axum::response::Response {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .is_some_and(|v| v == "Bearer sekrit-token");
        if !authorized {
            return AxumStatus::UNAUTHORIZED.into_response();
        }
        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            "event: update\ndata: {\"url\":\"https://x/1\"}\n\n",
        )
            .into_response()
    }

    async fn spawn_upstream() -> String {
        let app = Router::new().route("/api/v1/streaming/public", get(timeline));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_connect_reads_updates_then_aborts() {
        let config = StreamConfig {
            base_url: spawn_upstream().await,
            access_token: Some("sekrit-token".to_string()),
            ..StreamConfig::default()
        };

        let events: Vec<StreamEvent> = connect(&config).await.unwrap().collect().await;
        assert_eq!(
            events[0],
            StreamEvent::Update("{\"url\":\"https://x/1\"}".to_string())
        );
        assert!(matches!(events.last(), Some(StreamEvent::Abort(_))));
    }

    #[tokio::test]
    async fn test_connect_rejected_is_fatal() {
        let config = StreamConfig {
            base_url: spawn_upstream().await,
            access_token: None,
            ..StreamConfig::default()
        };

        assert!(matches!(
            connect(&config).await,
            Err(FedibgsError::FatalStream(_))
        ));
    }
}
