//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors,
//! interacts with AppState services, and returns JSON responses.
//! "No matches" is always an empty result, never an error.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use fedibgs_core::types::{Author, IndexStats, SearchMode};
use fedibgs_storage::PostView;
use fedibgs_vector::SearchHit;

use crate::error::ApiError;
use crate::live;
use crate::state::AppState;

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub offset: Option<u64>,
    /// semantic, lexical or hybrid. Absent means lexical browse.
    pub mode: Option<String>,
    /// `false` recomputes the query embedding instead of using the cache.
    pub cache: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorSearchParams {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OffsetParams {
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub q: Option<String>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub posts: Vec<SearchHit>,
    pub total_result_count: u64,
}

#[derive(Debug, Serialize)]
pub struct AuthorResponse {
    pub id: i64,
    pub username: String,
    pub url: String,
    pub posts: Vec<PostView>,
    pub total_posts: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

// =============================================================================
// Handler functions
// =============================================================================

/// GET /api/search - lexical browse, or semantic/hybrid ranking with `mode`.
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let q = params.q.unwrap_or_default();
    if q.trim().is_empty() {
        return Ok(Json(SearchResponse {
            posts: Vec::new(),
            total_result_count: 0,
        }));
    }

    let mode = match params.mode.as_deref() {
        Some(mode) => mode.parse::<SearchMode>()?,
        None => SearchMode::Lexical,
    };

    let response = match mode {
        SearchMode::Lexical => {
            let page = state
                .search_engine
                .lexical_page(&q, params.offset.unwrap_or(0))?;
            SearchResponse {
                posts: page.hits,
                total_result_count: page.total,
            }
        }
        SearchMode::Semantic | SearchMode::Hybrid => {
            let hits = state
                .search_engine
                .search(&q, mode, params.cache.unwrap_or(true))
                .await?;
            SearchResponse {
                total_result_count: hits.len() as u64,
                posts: hits,
            }
        }
    };

    Ok(Json(response))
}

/// GET /api/author/search - authors whose username or URL contains `q`.
pub async fn author_search(
    State(state): State<AppState>,
    Query(params): Query<AuthorSearchParams>,
) -> Result<Json<Vec<Author>>, ApiError> {
    let q = params.q.unwrap_or_default();
    if q.trim().is_empty() {
        return Ok(Json(Vec::new()));
    }
    let authors = state
        .authors
        .search(q.trim(), state.config.api.author_search_limit)?;
    Ok(Json(authors))
}

/// GET /api/author/{id} - an author with one page of their posts.
pub async fn author_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<OffsetParams>,
) -> Result<Json<AuthorResponse>, ApiError> {
    let author = state
        .authors
        .find_by_id(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Author {} not found", id)))?;

    let offset = params.offset.unwrap_or(0);
    let page_size = state.search_engine.page_size() as u64;
    let posts = state.query_service.author_posts(id, offset, page_size)?;
    let total_posts = state.query_service.count_author_posts(id)?;

    Ok(Json(AuthorResponse {
        id: author.id,
        username: author.username,
        url: author.url,
        posts,
        total_posts,
    }))
}

/// GET /api/stats - posts and attachments indexed in the rolling window.
pub async fn stats(State(state): State<AppState>) -> Result<Json<IndexStats>, ApiError> {
    Ok(Json(state.stats.get()?))
}

/// GET /stream - WebSocket live tail, optionally filtered by `q`.
pub async fn stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    let interval = state.stream_interval();
    let db = state.database.clone();
    ws.on_upgrade(move |socket| live::serve_socket(socket, db, params.q, interval))
}

/// GET /health - health check.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
