//! Error types for the crawl-state store adapter.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the crawl-state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The handshake or SCRAM exchange was rejected.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The server sent bytes we could not make sense of.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered a query with an error response.
    #[error("{kind} error: {message}")]
    Query { kind: &'static str, message: String },

    /// A query or connection attempt exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The database or one of its required tables is missing.
    #[error("schema error: {0}")]
    Schema(String),

    /// A document did not have the expected top-level shape.
    #[error("malformed {table} record: {reason}")]
    MalformedRecord { table: &'static str, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the error is worth retrying during startup.
    ///
    /// Only transport-level failures qualify; schema and authentication
    /// problems will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::Io(_) | StoreError::Timeout(_)
        )
    }
}
