//! FediBGS API crate - axum HTTP server, search and author handlers,
//! aggregate stats, and the live WebSocket tail.

pub mod error;
pub mod handlers;
pub mod live;
pub mod routes;
pub mod state;
pub mod stats;

pub use error::ApiError;
pub use live::{LiveMessage, LiveTail};
pub use routes::{create_router, start_server};
pub use state::AppState;
pub use stats::StatsCache;
