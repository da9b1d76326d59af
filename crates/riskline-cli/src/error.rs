//! CLI error types.

use thiserror::Error;

use riskline_engine::EngineError;
use riskline_ext_redb::StorageError;

/// CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid date format.
    #[error("Invalid date format: {0}. Use YYYY-MM-DD.")]
    InvalidDate(String),

    /// Invalid batch run identifier.
    #[error("Invalid batch run id: {0}")]
    InvalidRunId(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine error.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for CliError {
    fn from(e: toml::de::Error) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for CliError {
    fn from(e: toml::ser::Error) -> Self {
        CliError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Serialization(e.to_string())
    }
}

/// CLI result type.
pub type CliResult<T> = Result<T, CliError>;
