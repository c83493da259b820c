//! Request-level error taxonomy and its HTTP mapping.
//!
//! Core modules return `anyhow::Result` and are wrapped into [`ApiError`] at
//! the handler boundary. Nothing is retried automatically; the bulk import
//! loop catches its own per-chunk failures instead of surfacing them here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid `X-API-Key` header. Rejected by middleware before
    /// any handler logic runs.
    #[error("invalid or missing API key")]
    Auth,

    /// Malformed or out-of-range input, rejected before any I/O.
    #[error("{0}")]
    Validation(String),

    #[error("memory not found: {0}")]
    NotFound(String),

    /// Embedding or completion provider failure. Fails the whole request:
    /// no retry, no partial result.
    #[error("upstream provider error: {0}")]
    Provider(String),

    /// Store unreachable (health probe or connection failure).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Stable machine-readable kind for the JSON error body.
    fn kind(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Provider(_) => "provider",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
