//! Live tail of newly indexed posts over a WebSocket.
//!
//! Each session keeps a cursor on the store clock. Every tick it sends the
//! posts indexed strictly after the cursor as one message, possibly empty,
//! then moves the cursor to the store's current time. A post is therefore
//! never sent twice; one committed in the same millisecond as the cursor
//! move may be missed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info};

use fedibgs_core::error::Result;
use fedibgs_storage::{Database, PostView, QueryService};

/// One push to the client.
#[derive(Debug, Serialize)]
pub struct LiveMessage {
    pub posts: Vec<PostView>,
}

/// Cursor state for one session.
pub struct LiveTail {
    db: Arc<Database>,
    queries: QueryService,
    filter: Option<String>,
    cursor: i64,
}

impl LiveTail {
    /// Start at the store's current time: only posts indexed after the
    /// connection are delivered.
    pub fn new(db: Arc<Database>, filter: Option<String>) -> Result<Self> {
        let cursor = db.now_millis()?;
        Ok(Self::starting_at(db, filter, cursor))
    }

    pub fn starting_at(db: Arc<Database>, filter: Option<String>, cursor: i64) -> Self {
        Self {
            queries: QueryService::new(Arc::clone(&db)),
            db,
            filter: filter.filter(|q| !q.trim().is_empty()),
            cursor,
        }
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Fetch the posts past the cursor, then advance it to now regardless
    /// of how many were found.
    pub fn tick(&mut self) -> Result<Vec<PostView>> {
        let posts = self.queries.posts_since(self.cursor, self.filter.as_deref())?;
        self.cursor = self.db.now_millis()?;
        Ok(posts)
    }
}

/// Drive one WebSocket session until the peer goes away or the store fails.
///
/// Disconnects are noticed at tick boundaries only, so a message is either
/// built and sent whole or not at all.
pub async fn serve_socket(
    socket: WebSocket,
    db: Arc<Database>,
    filter: Option<String>,
    interval: Duration,
) {
    let (mut sender, mut receiver) = socket.split();

    let disconnected = Arc::new(AtomicBool::new(false));
    let reader = {
        let disconnected = Arc::clone(&disconnected);
        tokio::spawn(async move {
            while let Some(message) = receiver.next().await {
                if matches!(message, Ok(Message::Close(_)) | Err(_)) {
                    break;
                }
            }
            disconnected.store(true, Ordering::Release);
        })
    };

    let mut tail = match LiveTail::new(db, filter) {
        Ok(tail) => tail,
        Err(e) => {
            error!(error = %e, "Live stream could not read the store clock");
            reader.abort();
            return;
        }
    };
    info!(cursor = tail.cursor(), "Live stream session started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if disconnected.load(Ordering::Acquire) {
            break;
        }

        let posts = match tail.tick() {
            Ok(posts) => posts,
            Err(e) => {
                error!(error = %e, "Live stream query failed");
                break;
            }
        };
        let count = posts.len();
        let payload = match serde_json::to_string(&LiveMessage { posts }) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Live stream message encoding failed");
                break;
            }
        };

        if sender.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
        if count > 0 {
            debug!(posts = count, cursor = tail.cursor(), "Live stream pushed posts");
        }
    }

    reader.abort();
    info!("Live stream session ended");
}
