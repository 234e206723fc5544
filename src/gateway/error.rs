//! Errors returned by the transfer gateway.

use serde::Deserialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never produced a response (connect, TLS, body stream...).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("API error (status {status}): {}", .message.as_deref().unwrap_or("no message"))]
    Api {
        status: u16,
        /// Non-empty `message` field of the JSON error body, if any.
        message: Option<String>,
    },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Rejected before anything was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl GatewayError {
    /// Build an API error from a status code and the raw response body.
    pub fn from_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        Self::Api { status, message }
    }

    /// Human-readable message supplied by the remote service, if it sent one.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Api { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
