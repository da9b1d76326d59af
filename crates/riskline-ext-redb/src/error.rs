//! Storage error types.

use thiserror::Error;

use riskline_traits::TraitError;

/// Storage operation result type.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from the underlying storage engine.
    #[error("Database error: {0}")]
    Database(String),

    /// Transaction could not be started, committed or aborted.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A fixture file failed validation.
    #[error("Invalid fixture: {0}")]
    InvalidFixture(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            StorageError::Deserialization(err.to_string())
        } else {
            StorageError::Serialization(err.to_string())
        }
    }
}

impl From<StorageError> for TraitError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Serialization(msg) => TraitError::SerializationError(msg),
            StorageError::Deserialization(msg) => TraitError::ParseError(msg),
            StorageError::InvalidFixture(msg) => TraitError::InvalidInput(msg),
            StorageError::Io(e) => TraitError::IoError(e.to_string()),
            other => TraitError::DatabaseError(other.to_string()),
        }
    }
}
