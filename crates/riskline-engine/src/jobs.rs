//! Calculation jobs and their isolated write scopes.
//!
//! A job never writes to the gateway directly. It stages upserts into a
//! [`JobScope`], and the [`crate::runner::JobRunner`] commits the scope as one
//! atomic batch when the job succeeds. A failed or timed-out attempt drops its
//! scope, leaving every previously committed row untouched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use riskline_traits::analytics::BenchmarkKind;
use riskline_traits::batch::ErrorCategory;
use riskline_traits::portfolio::Portfolio;
use riskline_traits::storage::{WriteBatch, WriteOp};
use riskline_traits::PortfolioId;

use crate::benchmark::BenchmarkBetaEngine;
use crate::cache::ExposureCache;
use crate::correlation::CorrelationEngine;
use crate::error::{EngineError, EngineResult};
use crate::factor_exposure::FactorExposureEngine;

/// Job computing the portfolio exposure snapshot.
pub const POSITION_EXPOSURES: &str = "position_exposures";
/// Job computing market betas.
pub const MARKET_BETA: &str = "market_beta";
/// Job computing interest-rate betas.
pub const INTEREST_RATE_BETA: &str = "interest_rate_beta";
/// Job computing factor betas.
pub const FACTOR_EXPOSURES: &str = "factor_exposures";
/// Job computing pairwise correlations.
pub const CORRELATIONS: &str = "correlations";

// =============================================================================
// SCOPE
// =============================================================================

/// Uncommitted writes of one job attempt for one portfolio.
#[derive(Debug)]
pub struct JobScope {
    portfolio_id: PortfolioId,
    calculation_date: NaiveDate,
    batch: WriteBatch,
}

impl JobScope {
    /// Open an empty scope.
    pub fn new(portfolio_id: PortfolioId, calculation_date: NaiveDate) -> Self {
        Self {
            portfolio_id,
            calculation_date,
            batch: WriteBatch::new(),
        }
    }

    /// Portfolio the job runs for.
    pub fn portfolio_id(&self) -> &PortfolioId {
        &self.portfolio_id
    }

    /// Date the job calculates for.
    pub fn calculation_date(&self) -> NaiveDate {
        self.calculation_date
    }

    /// Stage an upsert.
    pub fn stage(&mut self, op: WriteOp) {
        self.batch.push(op);
    }

    /// Rows staged so far.
    pub fn staged_rows(&self) -> usize {
        self.batch.row_count()
    }

    /// True if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Release the staged writes for commit.
    pub fn into_batch(self) -> WriteBatch {
        self.batch
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Tagged result of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Calculation finished; staged rows are committed
    Success {
        /// Rows committed (filled in by the runner after commit)
        rows_written: usize,
        /// Data-quality note, e.g. skipped positions
        detail: Option<String>,
    },
    /// Not enough data to produce a result; nothing is committed
    InsufficientData {
        /// What was missing
        reason: String,
    },
    /// Classified failure
    Error {
        /// Error category
        category: ErrorCategory,
        /// Error message
        message: String,
    },
    /// Not run
    Skipped {
        /// Why
        reason: String,
    },
}

impl JobOutcome {
    /// Successful outcome with an optional detail note.
    pub fn success(detail: Option<String>) -> Self {
        JobOutcome::Success {
            rows_written: 0,
            detail,
        }
    }

    /// Convert an insufficient-data error into an outcome, passing other
    /// errors through.
    pub fn from_insufficient(err: EngineError) -> EngineResult<Self> {
        match err {
            EngineError::InsufficientData(reason) => Ok(JobOutcome::InsufficientData { reason }),
            other => Err(other),
        }
    }
}

// =============================================================================
// JOB TRAIT
// =============================================================================

/// One step of the per-portfolio batch sequence.
#[async_trait]
pub trait CalculationJob: Send + Sync {
    /// Stable job name used in results and critical-job configuration.
    fn name(&self) -> &str;

    /// Run the calculation, staging writes into `scope`.
    async fn run(&self, portfolio: &Portfolio, scope: &mut JobScope) -> EngineResult<JobOutcome>;
}

/// Recompute and stage the exposure snapshot.
pub struct PositionExposuresJob {
    cache: Arc<ExposureCache>,
}

impl PositionExposuresJob {
    /// Create the job.
    pub fn new(cache: Arc<ExposureCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl CalculationJob for PositionExposuresJob {
    fn name(&self) -> &str {
        POSITION_EXPOSURES
    }

    async fn run(&self, _portfolio: &Portfolio, scope: &mut JobScope) -> EngineResult<JobOutcome> {
        let snapshot = self.cache.refresh(scope).await?;
        let unpriced = snapshot.position_count - snapshot.priced_positions;
        let detail = (unpriced > 0)
            .then(|| format!("{unpriced} positions valued without a market close"));
        Ok(JobOutcome::success(detail))
    }
}

/// Market or interest-rate beta regression.
pub struct BenchmarkBetaJob {
    engine: Arc<BenchmarkBetaEngine>,
    kind: BenchmarkKind,
}

impl BenchmarkBetaJob {
    /// Create the job for a benchmark.
    pub fn new(engine: Arc<BenchmarkBetaEngine>, kind: BenchmarkKind) -> Self {
        Self { engine, kind }
    }
}

#[async_trait]
impl CalculationJob for BenchmarkBetaJob {
    fn name(&self) -> &str {
        match self.kind {
            BenchmarkKind::Market => MARKET_BETA,
            BenchmarkKind::InterestRate => INTEREST_RATE_BETA,
        }
    }

    async fn run(&self, portfolio: &Portfolio, scope: &mut JobScope) -> EngineResult<JobOutcome> {
        match self.engine.calculate_betas(portfolio, self.kind, scope).await {
            Ok(run) => Ok(JobOutcome::success(run.detail())),
            Err(err) => JobOutcome::from_insufficient(err),
        }
    }
}

/// Position and portfolio factor betas.
pub struct FactorExposuresJob {
    engine: Arc<FactorExposureEngine>,
}

impl FactorExposuresJob {
    /// Create the job.
    pub fn new(engine: Arc<FactorExposureEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl CalculationJob for FactorExposuresJob {
    fn name(&self) -> &str {
        FACTOR_EXPOSURES
    }

    async fn run(&self, portfolio: &Portfolio, scope: &mut JobScope) -> EngineResult<JobOutcome> {
        match self.engine.calculate_factor_betas(portfolio, scope).await {
            Ok(run) => Ok(JobOutcome::success(run.detail())),
            Err(err) => JobOutcome::from_insufficient(err),
        }
    }
}

/// Pairwise correlations over the configured lookback.
pub struct CorrelationsJob {
    engine: Arc<CorrelationEngine>,
    lookback_days: u32,
}

impl CorrelationsJob {
    /// Create the job.
    pub fn new(engine: Arc<CorrelationEngine>, lookback_days: u32) -> Self {
        Self {
            engine,
            lookback_days,
        }
    }
}

#[async_trait]
impl CalculationJob for CorrelationsJob {
    fn name(&self) -> &str {
        CORRELATIONS
    }

    async fn run(&self, _portfolio: &Portfolio, scope: &mut JobScope) -> EngineResult<JobOutcome> {
        match self
            .engine
            .calculate_correlations(self.lookback_days, scope)
            .await
        {
            Ok(run) => Ok(JobOutcome::success(run.detail())),
            Err(err) => JobOutcome::from_insufficient(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskline_traits::analytics::ExposureSnapshot;
    use rust_decimal::Decimal;

    #[test]
    fn test_scope_counts_rows() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 28).unwrap();
        let mut scope = JobScope::new(PortfolioId::new("PF"), date);
        assert!(scope.is_empty());

        scope.stage(WriteOp::ExposureSnapshot(ExposureSnapshot {
            portfolio_id: PortfolioId::new("PF"),
            calculation_date: date,
            net_exposure: Decimal::ZERO,
            gross_exposure: Decimal::ZERO,
            long_exposure: Decimal::ZERO,
            short_exposure: Decimal::ZERO,
            position_count: 0,
            priced_positions: 0,
            created_at: chrono::Utc::now(),
        }));
        assert_eq!(scope.staged_rows(), 1);
        assert_eq!(scope.into_batch().len(), 1);
    }

    #[test]
    fn test_insufficient_conversion() {
        let outcome = JobOutcome::from_insufficient(EngineError::InsufficientData("3 obs".into()));
        assert_eq!(
            outcome,
            Ok(JobOutcome::InsufficientData {
                reason: "3 obs".into()
            })
        );

        let passthrough = JobOutcome::from_insufficient(EngineError::TransientInfra("reset".into()));
        assert!(passthrough.is_err());
    }

    #[test]
    fn test_outcome_wire_tag() {
        let json = serde_json::to_value(JobOutcome::Skipped {
            reason: "critical job failed".into(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "skipped");
    }
}
