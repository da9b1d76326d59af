//! Error types for repository and gateway operations.

use thiserror::Error;

/// Common error type for trait operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TraitError {
    /// Connection to the backing store failed or was reset
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation timed out
    #[error("timeout")]
    Timeout,

    /// A commit raced another writer on the same natural key and was rejected
    /// before anything was applied.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    /// Requested resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Parse/deserialization error
    #[error("parse error: {0}")]
    ParseError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Database error
    #[error("database error: {0}")]
    DatabaseError(String),

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl TraitError {
    /// Returns true for infrastructure failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, TraitError::ConnectionFailed(_) | TraitError::Timeout)
    }
}

impl From<std::io::Error> for TraitError {
    fn from(e: std::io::Error) -> Self {
        TraitError::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for TraitError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            TraitError::ParseError(e.to_string())
        } else {
            TraitError::SerializationError(e.to_string())
        }
    }
}
