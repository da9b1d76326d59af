//! Persisted calculation entities.
//!
//! Every entity here is immutable once produced. A later `calculation_date`
//! supersedes it; re-running the same date upserts by natural key.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use riskline_math::regression::{FitQuality, Regression, Significance};

use crate::ids::{CalculationId, FactorId, PortfolioId, PositionId, Symbol};

// =============================================================================
// SHARED
// =============================================================================

/// What a beta was estimated for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum BetaSubject {
    /// A single position
    Position(PositionId),
    /// The portfolio aggregate
    Portfolio,
}

impl BetaSubject {
    /// Stable string form used in storage keys.
    pub fn key(&self) -> String {
        match self {
            BetaSubject::Position(id) => format!("position:{}", id),
            BetaSubject::Portfolio => "portfolio".to_string(),
        }
    }
}

/// Observation-window quality of a calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    /// Below the minimum comfortable window
    Limited,
    /// Between the minimum and full windows
    Partial,
    /// At or above the full window
    Full,
}

impl DataQuality {
    /// Classify an observation count against the limited/full thresholds.
    pub fn classify(observations: usize, limited_threshold: usize, full_threshold: usize) -> Self {
        if observations < limited_threshold {
            DataQuality::Limited
        } else if observations >= full_threshold {
            DataQuality::Full
        } else {
            DataQuality::Partial
        }
    }
}

// =============================================================================
// REGRESSION RESULTS
// =============================================================================

/// Benchmark a regression beta is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkKind {
    /// Broad equity market proxy
    Market,
    /// Interest-rate (treasury) proxy
    InterestRate,
}

impl BenchmarkKind {
    /// Stable string form used in storage keys and job names.
    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkKind::Market => "market",
            BenchmarkKind::InterestRate => "interest_rate",
        }
    }
}

/// A persisted single-factor regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionResult {
    /// Owning portfolio
    pub portfolio_id: PortfolioId,
    /// Position or portfolio aggregate
    pub subject: BetaSubject,
    /// Benchmark regressed against
    pub benchmark: BenchmarkKind,
    /// Calculation date
    pub calculation_date: NaiveDate,
    /// Capped beta
    pub beta: f64,
    /// Beta before capping
    pub raw_beta: f64,
    /// True when `beta` was clipped
    pub capped: bool,
    /// Intercept
    pub alpha: f64,
    /// Coefficient of determination
    pub r_squared: f64,
    /// Two-sided p-value of the slope
    pub p_value: f64,
    /// Standard error of the slope
    pub std_error: f64,
    /// Observations used
    pub n_observations: usize,
    /// Significance classification
    pub significance: Significance,
    /// R-squared bucket
    pub fit_quality: FitQuality,
}

impl RegressionResult {
    /// Attach persistence keys to a regression fit.
    pub fn from_regression(
        portfolio_id: PortfolioId,
        subject: BetaSubject,
        benchmark: BenchmarkKind,
        calculation_date: NaiveDate,
        fit: &Regression,
    ) -> Self {
        Self {
            portfolio_id,
            subject,
            benchmark,
            calculation_date,
            beta: fit.beta,
            raw_beta: fit.raw_beta,
            capped: fit.capped,
            alpha: fit.alpha,
            r_squared: fit.r_squared,
            p_value: fit.p_value,
            std_error: fit.std_error,
            n_observations: fit.n_observations,
            significance: fit.significance,
            fit_quality: fit.fit_quality,
        }
    }
}

// =============================================================================
// EXPOSURES
// =============================================================================

/// Where an exposure read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureSource {
    /// Reused a persisted snapshot within the staleness window
    Cache,
    /// Recomputed from current positions
    RealTime,
}

/// Net/gross exposure of a portfolio on a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSnapshot {
    /// Portfolio
    pub portfolio_id: PortfolioId,
    /// Calculation date
    pub calculation_date: NaiveDate,
    /// Longs minus shorts
    pub net_exposure: Decimal,
    /// Sum of absolute exposures
    pub gross_exposure: Decimal,
    /// Sum of long-side exposures
    pub long_exposure: Decimal,
    /// Sum of short-side exposures (negative or zero)
    pub short_exposure: Decimal,
    /// Positions considered
    pub position_count: usize,
    /// Positions for which a price was found
    pub priced_positions: usize,
    /// Wall-clock time the snapshot was produced
    pub created_at: DateTime<Utc>,
}

impl ExposureSnapshot {
    /// Age in days relative to `as_of`. Negative if the snapshot is in the future.
    pub fn age_days(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.calculation_date).num_days()
    }
}

// =============================================================================
// CORRELATIONS
// =============================================================================

/// Header of a pairwise correlation calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationCalculation {
    /// Calculation identifier, referenced by its pairs
    pub id: CalculationId,
    /// Portfolio
    pub portfolio_id: PortfolioId,
    /// Lookback window in calendar days
    pub lookback_days: u32,
    /// Calculation date
    pub calculation_date: NaiveDate,
    /// Every symbol that had return data in the window
    pub symbols: Vec<Symbol>,
    /// Weighted diversification score at compute time
    pub overall_correlation: Option<f64>,
    /// Wall-clock time the calculation was produced
    pub created_at: DateTime<Utc>,
}

/// Correlation between two symbols within a calculation.
///
/// Stored once per unordered pair with `symbol_a < symbol_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseCorrelation {
    /// Owning calculation
    pub calculation_id: CalculationId,
    /// Lexicographically smaller symbol
    pub symbol_a: Symbol,
    /// Lexicographically larger symbol
    pub symbol_b: Symbol,
    /// Pearson correlation of daily returns
    pub correlation: f64,
    /// Overlapping return observations
    pub data_points: usize,
}

impl PairwiseCorrelation {
    /// Build a pair with canonical symbol ordering.
    pub fn new(
        calculation_id: CalculationId,
        a: Symbol,
        b: Symbol,
        correlation: f64,
        data_points: usize,
    ) -> Self {
        let (symbol_a, symbol_b) = if a <= b { (a, b) } else { (b, a) };
        Self {
            calculation_id,
            symbol_a,
            symbol_b,
            correlation,
            data_points,
        }
    }
}

// =============================================================================
// FACTOR BETAS
// =============================================================================

/// Factor beta for a position or a portfolio aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorBeta {
    /// Portfolio
    pub portfolio_id: PortfolioId,
    /// Position or portfolio aggregate
    pub subject: BetaSubject,
    /// Factor
    pub factor_id: FactorId,
    /// Calculation date
    pub calculation_date: NaiveDate,
    /// Beta to the factor proxy
    pub beta: f64,
    /// Beta-weighted dollar exposure
    pub dollar_exposure: Decimal,
    /// Fit quality (position rows); observation-weighted mean for portfolio rows
    pub r_squared: f64,
    /// Observations (position rows); minimum across positions for portfolio rows
    pub n_observations: usize,
    /// Window quality
    pub quality: DataQuality,
    /// Positions skipped for this factor (portfolio rows only)
    #[serde(default)]
    pub skipped_positions: usize,
}
