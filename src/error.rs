//! Client error types.
//!
//! One unified [`ClientError`] covers authentication, transport, HTTP and
//! JSON-RPC failures, plus the distinguished [`ClientError::Aborted`] outcome
//! for intentionally cancelled requests. `Aborted` is filtered out by every
//! caller and must never surface through an `error` event — an aborted
//! request is not a protocol failure.

use crate::client::ClientState;

/// Unified error type for all client operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The auth-header provider failed. Distinct from transport errors so
    /// consumers can tell credential problems from network problems.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Transport-level error (connection failed, request failed, etc.).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request or stream timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// HTTP error with status code and response body.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// Invalid JSON received from the remote (parse or deserialization failure).
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// A JSON-RPC error envelope was received from the remote agent.
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// The request was intentionally cancelled by this client.
    ///
    /// Never reported through an `error` event.
    #[error("request aborted")]
    Aborted,

    /// An operation was rejected because the client state does not permit it.
    #[error("operation not permitted in state {0}")]
    InvalidState(ClientState),

    /// Consecutive retries reached their configured maximum.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of consecutive failed attempts.
        attempts: u32,
        /// The last underlying error.
        last: Box<ClientError>,
    },
}

/// Convenience result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// True for the distinguished intentional-cancellation outcome.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ClientError::Aborted)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::InvalidJson(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_is_distinguished() {
        assert!(ClientError::Aborted.is_aborted());
        assert!(!ClientError::Transport("connection refused".into()).is_aborted());
    }

    #[test]
    fn display_includes_context() {
        let err = ClientError::Http {
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "HTTP 503: unavailable");

        let err = ClientError::JsonRpc {
            code: -32001,
            message: "Task not found".into(),
            data: None,
        };
        assert!(err.to_string().contains("-32001"));
    }

    #[test]
    fn retries_exhausted_carries_last_error() {
        let err = ClientError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ClientError::Timeout("poll get".into())),
        };
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("poll get"));
    }
}
