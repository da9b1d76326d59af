//! # Riskline Math
//!
//! Numerical utilities for the Riskline batch analytics engine.
//!
//! This crate provides:
//!
//! - **Regression**: Single-factor OLS with beta capping, significance testing
//!   and R-squared classification ([`regression::RegressionEngine`])
//! - **Statistics**: Means, variances, Pearson correlation and date-aligned
//!   return series ([`stats`])
//!
//! ## Design Philosophy
//!
//! - **Pure**: No I/O, no clocks, no randomness. Same inputs, same outputs.
//! - **Strict inputs**: NaN/Inf and mismatched series are rejected, never
//!   silently dropped.
//! - **Typed failures**: Callers can tell malformed input from too little data.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::similar_names)]
#![allow(clippy::many_single_char_names)]

pub mod error;
pub mod regression;
pub mod stats;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{RegressionError, RegressionResult};
    pub use crate::regression::{
        classify_r_squared, FitQuality, Regression, RegressionEngine, Significance,
    };
    pub use crate::stats::{align_returns, mean, pearson, sample_variance, simple_returns, ReturnSeries};
}

pub use error::{RegressionError, RegressionResult};
