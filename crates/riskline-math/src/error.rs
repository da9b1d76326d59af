//! Error types for regression and statistics.

use thiserror::Error;

/// A specialized Result type for regression operations.
pub type RegressionResult<T> = Result<T, RegressionError>;

/// Errors that can occur while fitting a regression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegressionError {
    /// The input series are malformed: mismatched lengths, NaN/Inf values,
    /// zero-variance regressor or out-of-range parameters.
    #[error("Invalid input: {reason}")]
    InputValidation {
        /// Description of the invalid input.
        reason: String,
    },

    /// Fewer aligned observations than the configured minimum.
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData {
        /// Minimum required observations.
        required: usize,
        /// Actual observations.
        actual: usize,
    },
}

impl RegressionError {
    /// Creates an input validation error.
    #[must_use]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InputValidation {
            reason: reason.into(),
        }
    }

    /// Creates an insufficient data error.
    #[must_use]
    pub fn insufficient_data(required: usize, actual: usize) -> Self {
        Self::InsufficientData { required, actual }
    }
}
