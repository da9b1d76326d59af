//! Engine error types.
//!
//! Every error carries its [`ErrorCategory`] structurally, so the job runner
//! decides whether to retry from the variant alone.

use thiserror::Error;

use riskline_math::RegressionError;
use riskline_traits::batch::ErrorCategory;
use riskline_traits::{BatchRunId, TraitError};

/// A specialized Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Malformed input series or request
    #[error("input validation: {0}")]
    InputValidation(String),

    /// Below the minimum window or observation count
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Timeout or connection failure; retried
    #[error("transient infrastructure error: {0}")]
    TransientInfra(String),

    /// A commit was rejected by a concurrent writer before anything was applied
    #[error("concurrent commit rejected: {0}")]
    ConcurrencyArtifact(String),

    /// Logic or precondition violation; not retried
    #[error("calculation error: {0}")]
    PermanentCalculation(String),

    /// Requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A batch run is already in progress
    #[error("batch run {0} is already in progress")]
    BatchInProgress(BatchRunId),

    /// A fully successful run already exists for the date
    #[error("batch run {0} already completed for this date")]
    AlreadyCompleted(BatchRunId),

    /// The run cannot proceed at all
    #[error("run-fatal error: {0}")]
    RunFatal(String),
}

impl EngineError {
    /// Typed category recorded against a failed job.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::InputValidation(_) => ErrorCategory::InputValidation,
            EngineError::InsufficientData(_) => ErrorCategory::InsufficientData,
            EngineError::TransientInfra(_) => ErrorCategory::TransientInfra,
            EngineError::ConcurrencyArtifact(_) => ErrorCategory::ConcurrencyArtifact,
            EngineError::PermanentCalculation(_)
            | EngineError::NotFound(_)
            | EngineError::ConfigError(_)
            | EngineError::BatchInProgress(_)
            | EngineError::AlreadyCompleted(_)
            | EngineError::RunFatal(_) => ErrorCategory::PermanentCalculation,
        }
    }

    /// Whether the job runner may retry this error.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

impl From<TraitError> for EngineError {
    fn from(e: TraitError) -> Self {
        match e {
            TraitError::ConnectionFailed(msg) => EngineError::TransientInfra(msg),
            TraitError::Timeout => EngineError::TransientInfra("repository timeout".into()),
            TraitError::TransactionConflict(msg) => EngineError::ConcurrencyArtifact(msg),
            TraitError::NotFound(msg) => EngineError::NotFound(msg),
            TraitError::InvalidInput(msg) => EngineError::InputValidation(msg),
            other => EngineError::PermanentCalculation(other.to_string()),
        }
    }
}

impl From<RegressionError> for EngineError {
    fn from(e: RegressionError) -> Self {
        match e {
            RegressionError::InputValidation { .. } => EngineError::InputValidation(e.to_string()),
            RegressionError::InsufficientData { .. } => EngineError::InsufficientData(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trait_error_mapping() {
        assert_eq!(
            EngineError::from(TraitError::Timeout).category(),
            ErrorCategory::TransientInfra
        );
        assert_eq!(
            EngineError::from(TraitError::ConnectionFailed("reset".into())).category(),
            ErrorCategory::TransientInfra
        );
        assert_eq!(
            EngineError::from(TraitError::TransactionConflict("snapshot".into())).category(),
            ErrorCategory::ConcurrencyArtifact
        );
        assert_eq!(
            EngineError::from(TraitError::DatabaseError("corrupt".into())).category(),
            ErrorCategory::PermanentCalculation
        );
    }

    #[test]
    fn test_regression_error_mapping() {
        let err: EngineError = RegressionError::insufficient_data(20, 4).into();
        assert_eq!(err.category(), ErrorCategory::InsufficientData);
        assert!(!err.is_retryable());

        let err: EngineError = RegressionError::invalid_input("NaN").into();
        assert_eq!(err.category(), ErrorCategory::InputValidation);
    }
}
