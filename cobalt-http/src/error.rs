//! HTTP error types.

use thiserror::Error;

/// Errors surfaced by the REST pipeline.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Transport-level request failure.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON serialization or deserialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The API returned a structured error body.
    #[error("API error {code}: {message}")]
    Api {
        /// Platform error code.
        code: u32,
        /// Human-readable message.
        message: String,
    },

    /// Invalid or missing token.
    #[error("unauthorized: invalid token")]
    Unauthorized,

    /// Missing permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource does not exist.
    #[error("not found")]
    NotFound,

    /// Upstream error that survived the retry budget.
    #[error("server error {0} after retries")]
    ServerError(u16),

    /// Header value could not be constructed from the token.
    #[error("invalid header value")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// The rate-limit fabric shut down underneath a request.
    #[error("rate limiter closed")]
    Closed,
}

/// Structured error body returned by the API.
#[derive(Debug, serde::Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub message: String,
}
