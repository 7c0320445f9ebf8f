//! API error type and JSON error response formatting.
//!
//! Every handler error becomes a `{error, message}` body with a status code
//! chosen from the underlying [`FedibgsError`] variant.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use fedibgs_core::error::FedibgsError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - invalid parameters.
    BadRequest(String),
    /// 404 - resource does not exist.
    NotFound(String),
    /// 500 - unexpected server error.
    Internal(String),
    /// 503 - a collaborator the request depends on is down.
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        if status.is_server_error() {
            tracing::error!(status = %status, message = %message, "Request failed");
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<FedibgsError> for ApiError {
    fn from(err: FedibgsError) -> Self {
        match err {
            FedibgsError::Config(msg) | FedibgsError::Search(msg) => ApiError::BadRequest(msg),
            FedibgsError::Embedding(msg) | FedibgsError::TransientUpstream(msg) => {
                ApiError::ServiceUnavailable(msg)
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}
