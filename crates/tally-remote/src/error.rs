//! Error types for the data-access backends.

use thiserror::Error;

/// Errors that can occur when talking to a data-access backend.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rate limited by the provider.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {secs}s)"),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After, if present).
        retry_after_secs: Option<u64>,
    },

    /// Resource not found.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// API error from the provider.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl RemoteError {
    /// Whether this error is the provider's rate limit.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. })
    }
}
