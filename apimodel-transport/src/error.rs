//! Transport error types.

use serde_json::Value;
use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: Value },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The response body was not valid JSON.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Returns the HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the response body, if the server answered.
    pub fn body(&self) -> Option<&Value> {
        match self {
            TransportError::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Returns true for a 404 response.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => TransportError::Status {
                status: status.as_u16(),
                body: Value::String(e.to_string()),
            },
            None => TransportError::Network(e.to_string()),
        }
    }
}
