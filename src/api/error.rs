//! Transport-level error type for the VM server API.
//!
//! Every failed exchange ends up in one of three shapes: no response was
//! received at all, the server answered with a non-2xx status (and usually a
//! JSON `{"error": "..."}` body), or a 2xx body did not have the expected shape.

use serde::Deserialize;
use thiserror::Error;

/// Error returned by [`Transport`](super::Transport) and [`ApiClient`](super::ApiClient)
#[derive(Debug, Error)]
pub enum ApiError {
    /// No response received (connection refused, DNS failure, timeout)
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the request
    #[error("{message}")]
    Status { status: u16, message: String },

    /// The response body could not be decoded
    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Error body returned by the server on non-2xx responses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    /// Build a status error from a raw response body.
    ///
    /// Uses the `error` field of a JSON body when present, otherwise falls
    /// back to `HTTP <status>`.
    pub fn from_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| format!("HTTP {}", status));

        ApiError::Status { status, message }
    }

    /// HTTP status of a rejected request
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}
