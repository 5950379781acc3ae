//! Gemini API Error Types
//!
//! Structured error handling for Gemini file and generation calls.
//! Maps HTTP status codes to specific error variants for retry decisions.

use serde::Deserialize;

/// Gemini API error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeminiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Request error: {0}")]
    Request(String),
}

/// Google API error envelope: `{"error": {"code", "message", "status"}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Pull the human readable message out of a Google error body, falling
/// back to the raw body when it isn't the usual envelope.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ => body.trim().to_string(),
    }
}

impl GeminiError {
    /// Whether this error is worth retrying (transient network/server trouble)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GeminiError::RateLimited
                | GeminiError::Timeout
                | GeminiError::Network(_)
                | GeminiError::Server(_, _)
        )
    }

    /// Create a GeminiError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = error_message(body);
        match status {
            400 => GeminiError::InvalidRequest(message),
            401 | 403 => GeminiError::PermissionDenied(message),
            404 => GeminiError::NotFound(message),
            408 => GeminiError::Timeout,
            429 => GeminiError::RateLimited,
            500..=599 => GeminiError::Server(status, message),
            _ => GeminiError::Request(format!("HTTP {}: {}", status, message)),
        }
    }
}

impl From<reqwest::Error> for GeminiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GeminiError::Timeout
        } else if err.is_connect() {
            GeminiError::Network(err.to_string())
        } else if err.is_decode() {
            GeminiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            GeminiError::from_status(status.as_u16(), &err.to_string())
        } else {
            GeminiError::Request(err.to_string())
        }
    }
}
