//! Single-factor ordinary least squares regression.
//!
//! Fits `y = alpha + beta * x` and reports the slope together with the fit
//! diagnostics used across the engine: R-squared, standard error, a two-sided
//! p-value for the slope and classification labels.
//!
//! # Example
//!
//! ```rust
//! use riskline_math::regression::RegressionEngine;
//!
//! let x = vec![0.01, -0.02, 0.015, 0.003, -0.007];
//! let y: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
//!
//! let engine = RegressionEngine::new(3);
//! let fit = engine.run_single_factor_regression(&y, &x, 5.0, 0.95).unwrap();
//! assert!((fit.beta - 2.0).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::{RegressionError, RegressionResult};

/// Smallest minimum observation count the engine accepts. Two observations
/// leave zero residual degrees of freedom.
pub const MIN_OBSERVATIONS_FLOOR: usize = 3;

// =============================================================================
// CLASSIFICATIONS
// =============================================================================

/// Statistical significance of the slope at the configured confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    /// `p < 1 - confidence`
    HighlySignificant,
    /// `p < 2 * (1 - confidence)`
    MarginallySignificant,
    /// Everything else
    NotSignificant,
}

impl Significance {
    /// Classify a p-value against a confidence level.
    pub fn classify(p_value: f64, confidence: f64) -> Self {
        let alpha = 1.0 - confidence;
        if p_value < alpha {
            Significance::HighlySignificant
        } else if p_value < 2.0 * alpha {
            Significance::MarginallySignificant
        } else {
            Significance::NotSignificant
        }
    }
}

/// R-squared bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitQuality {
    /// Below 0.10
    VeryPoor,
    /// 0.10 to 0.30
    Poor,
    /// 0.30 to 0.50
    Fair,
    /// 0.50 to 0.70
    Good,
    /// 0.70 and above
    Excellent,
}

/// Bucket an R-squared value.
pub fn classify_r_squared(r_squared: f64) -> FitQuality {
    if r_squared >= 0.70 {
        FitQuality::Excellent
    } else if r_squared >= 0.50 {
        FitQuality::Good
    } else if r_squared >= 0.30 {
        FitQuality::Fair
    } else if r_squared >= 0.10 {
        FitQuality::Poor
    } else {
        FitQuality::VeryPoor
    }
}

// =============================================================================
// RESULT
// =============================================================================

/// Output of a single-factor regression.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    /// Slope clipped to `[-cap, cap]`
    pub beta: f64,
    /// Slope before clipping
    pub raw_beta: f64,
    /// True when clipping changed the slope
    pub capped: bool,
    /// Intercept
    pub alpha: f64,
    /// Coefficient of determination, in [0, 1]
    pub r_squared: f64,
    /// Two-sided p-value of the raw slope, in [0, 1]
    pub p_value: f64,
    /// Standard error of the raw slope
    pub std_error: f64,
    /// t statistic of the raw slope
    pub t_stat: f64,
    /// Number of observations
    pub n_observations: usize,
    /// Significance classification
    pub significance: Significance,
    /// R-squared bucket
    pub fit_quality: FitQuality,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Stateless OLS engine holding the minimum observation count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegressionEngine {
    min_observations: usize,
}

impl Default for RegressionEngine {
    fn default() -> Self {
        Self::new(20)
    }
}

impl RegressionEngine {
    /// Create an engine. Values below [`MIN_OBSERVATIONS_FLOOR`] are raised to it.
    pub fn new(min_observations: usize) -> Self {
        Self {
            min_observations: min_observations.max(MIN_OBSERVATIONS_FLOOR),
        }
    }

    /// The effective minimum observation count.
    pub fn min_observations(&self) -> usize {
        self.min_observations
    }

    /// Regress `y` on `x` with an intercept.
    ///
    /// # Errors
    ///
    /// - [`RegressionError::InputValidation`] on mismatched lengths, NaN/Inf
    ///   values, a constant `x`, a non-positive `cap` or a `confidence`
    ///   outside (0, 1).
    /// - [`RegressionError::InsufficientData`] when fewer than the minimum
    ///   observations are supplied.
    pub fn run_single_factor_regression(
        &self,
        y: &[f64],
        x: &[f64],
        cap: f64,
        confidence: f64,
    ) -> RegressionResult<Regression> {
        if y.len() != x.len() {
            return Err(RegressionError::invalid_input(format!(
                "length mismatch: y has {}, x has {}",
                y.len(),
                x.len()
            )));
        }
        if !(cap.is_finite() && cap > 0.0) {
            return Err(RegressionError::invalid_input(format!(
                "cap must be positive and finite, got {cap}"
            )));
        }
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(RegressionError::invalid_input(format!(
                "confidence must be in (0, 1), got {confidence}"
            )));
        }
        if let Some(i) = y.iter().chain(x.iter()).position(|v| !v.is_finite()) {
            let (series, index) = if i < y.len() { ("y", i) } else { ("x", i - y.len()) };
            return Err(RegressionError::invalid_input(format!(
                "non-finite value in {series} at index {index}"
            )));
        }

        let n = x.len();
        if n < self.min_observations {
            return Err(RegressionError::insufficient_data(self.min_observations, n));
        }

        // Exact check: a constant series has identical elements, whatever
        // rounding the mean picks up.
        let x_min = x.iter().copied().fold(f64::INFINITY, f64::min);
        let x_max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if x_min == x_max {
            return Err(RegressionError::invalid_input("x has zero variance"));
        }

        let nf = n as f64;
        let mean_x = x.iter().sum::<f64>() / nf;
        let mean_y = y.iter().sum::<f64>() / nf;

        let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
        for (xi, yi) in x.iter().zip(y) {
            let dx = xi - mean_x;
            let dy = yi - mean_y;
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }

        // Deviations can underflow to zero or overflow to infinity even
        // when the elements differ.
        if !sxx.is_finite() {
            return Err(RegressionError::invalid_input("x variance overflows"));
        }
        if sxx <= 0.0 {
            return Err(RegressionError::invalid_input("x has zero variance"));
        }

        let raw_beta = sxy / sxx;
        if !raw_beta.is_finite() {
            return Err(RegressionError::invalid_input(format!(
                "slope is not finite (sxy = {sxy}, sxx = {sxx})"
            )));
        }
        let alpha = mean_y - raw_beta * mean_x;

        let ss_res: f64 = x
            .iter()
            .zip(y)
            .map(|(xi, yi)| {
                let e = yi - (alpha + raw_beta * xi);
                e * e
            })
            .sum();

        let dof = (n - 2) as f64;
        let y_constant = y.iter().all(|v| *v == y[0]);

        // Constant y: nothing to explain.
        let (r_squared, std_error, t_stat, p_value) = if y_constant || syy == 0.0 {
            (0.0, 0.0, 0.0, 1.0)
        } else if ss_res <= f64::EPSILON * syy {
            (1.0, 0.0, f64::INFINITY, 0.0)
        } else {
            let r_squared = match 1.0 - ss_res / syy {
                r if r.is_nan() => 0.0,
                r => r.clamp(0.0, 1.0),
            };
            let std_error = (ss_res / dof / sxx).sqrt();
            let t_stat = raw_beta / std_error;
            (r_squared, std_error, t_stat, two_sided_p_value(t_stat, dof))
        };

        let beta = raw_beta.clamp(-cap, cap);

        Ok(Regression {
            beta,
            raw_beta,
            capped: beta != raw_beta,
            alpha,
            r_squared,
            p_value,
            std_error,
            t_stat,
            n_observations: n,
            significance: Significance::classify(p_value, confidence),
            fit_quality: classify_r_squared(r_squared),
        })
    }
}

/// Two-sided p-value of a t statistic with `dof` degrees of freedom.
fn two_sided_p_value(t_stat: f64, dof: f64) -> f64 {
    if t_stat.is_nan() {
        return 1.0;
    }
    if t_stat.is_infinite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, dof) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t_stat.abs()))).clamp(0.0, 1.0),
        // dof >= 1 is guaranteed by the observation floor
        Err(_) => 1.0,
    }
}
