//! Persistence gateway.
//!
//! Writes are expressed as a [`WriteBatch`] of natural-key upserts that the
//! gateway applies atomically in [`PersistenceGateway::commit`]. A batch is
//! either fully applied or not applied at all, so a job that fails before
//! committing leaves no trace, and a committed batch is never partially
//! visible to readers.
//!
//! Implementations are EXTENSIONS (in-memory, redb).

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::analytics::{
    BenchmarkKind, CorrelationCalculation, ExposureSnapshot, FactorBeta, PairwiseCorrelation,
    RegressionResult,
};
use crate::batch::{BatchRun, JobResult};
use crate::error::TraitError;
use crate::ids::{BatchRunId, PortfolioId};

// =============================================================================
// WRITE BATCH
// =============================================================================

/// A single natural-key write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replaces every regression row of (portfolio, benchmark, date)
    Regressions {
        /// Portfolio
        portfolio_id: PortfolioId,
        /// Benchmark regressed against
        benchmark: BenchmarkKind,
        /// Calculation date
        calculation_date: NaiveDate,
        /// The complete row set for the key
        rows: Vec<RegressionResult>,
    },
    /// Replaces every factor beta row of (portfolio, date)
    FactorBetas {
        /// Portfolio
        portfolio_id: PortfolioId,
        /// Calculation date
        calculation_date: NaiveDate,
        /// The complete row set for the key, position and portfolio level
        rows: Vec<FactorBeta>,
    },
    /// Upsert by (portfolio, date)
    ExposureSnapshot(ExposureSnapshot),
    /// Upsert header by (portfolio, lookback, date); replaces the pair set
    Correlation {
        /// Calculation header
        header: CorrelationCalculation,
        /// Pairs belonging to the header
        pairs: Vec<PairwiseCorrelation>,
    },
    /// Upsert by run id
    BatchRun(BatchRun),
    /// Upsert by (run, job, portfolio)
    JobResult(JobResult),
}

impl WriteOp {
    /// Rows this op touches (a correlation counts its header and pairs).
    pub fn row_count(&self) -> usize {
        match self {
            WriteOp::Correlation { pairs, .. } => 1 + pairs.len(),
            WriteOp::Regressions { rows, .. } => rows.len(),
            WriteOp::FactorBetas { rows, .. } => rows.len(),
            _ => 1,
        }
    }

    /// Check that every row of a replacing op belongs to the op's key.
    pub fn check_keys(&self) -> Result<(), TraitError> {
        match self {
            WriteOp::Regressions {
                portfolio_id,
                benchmark,
                calculation_date,
                rows,
            } => match rows.iter().find(|r| {
                r.portfolio_id != *portfolio_id
                    || r.benchmark != *benchmark
                    || r.calculation_date != *calculation_date
            }) {
                Some(row) => Err(TraitError::InvalidInput(format!(
                    "regression row for {} {} {} in set for {portfolio_id} {} {calculation_date}",
                    row.portfolio_id,
                    row.benchmark.as_str(),
                    row.calculation_date,
                    benchmark.as_str()
                ))),
                None => Ok(()),
            },
            WriteOp::FactorBetas {
                portfolio_id,
                calculation_date,
                rows,
            } => match rows
                .iter()
                .find(|r| r.portfolio_id != *portfolio_id || r.calculation_date != *calculation_date)
            {
                Some(row) => Err(TraitError::InvalidInput(format!(
                    "factor beta row for {} {} in set for {portfolio_id} {calculation_date}",
                    row.portfolio_id, row.calculation_date
                ))),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

/// An ordered set of upserts committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a batch holding one op.
    pub fn single(op: WriteOp) -> Self {
        Self { ops: vec![op] }
    }

    /// Stage an op.
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    /// Staged ops in insertion order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consume the batch.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    /// Number of staged ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Total rows touched.
    pub fn row_count(&self) -> usize {
        self.ops.iter().map(WriteOp::row_count).sum()
    }
}

// =============================================================================
// GATEWAY
// =============================================================================

/// Append/upsert persistence for calculation results and batch bookkeeping.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Verify the backing store is reachable.
    async fn health_check(&self) -> Result<(), TraitError>;

    /// Apply every op in `batch` atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<(), TraitError>;

    // === Exposures ===

    /// Most recent snapshot with `calculation_date <= on_or_before`.
    async fn latest_exposure_snapshot(
        &self,
        portfolio_id: &PortfolioId,
        on_or_before: NaiveDate,
    ) -> Result<Option<ExposureSnapshot>, TraitError>;

    // === Regressions ===

    /// All regression rows for a portfolio, benchmark and date.
    async fn get_regression_results(
        &self,
        portfolio_id: &PortfolioId,
        benchmark: BenchmarkKind,
        calculation_date: NaiveDate,
    ) -> Result<Vec<RegressionResult>, TraitError>;

    // === Factor betas ===

    /// All factor beta rows (position and portfolio level) for a date.
    async fn get_factor_betas(
        &self,
        portfolio_id: &PortfolioId,
        calculation_date: NaiveDate,
    ) -> Result<Vec<FactorBeta>, TraitError>;

    /// Distinct dates `<= on_or_before` that have portfolio-level factor rows,
    /// most recent first.
    async fn factor_beta_dates(
        &self,
        portfolio_id: &PortfolioId,
        on_or_before: NaiveDate,
    ) -> Result<Vec<NaiveDate>, TraitError>;

    // === Correlations ===

    /// Most recent calculation for `(portfolio, lookback)` with
    /// `calculation_date <= on_or_before`, with its pairs.
    async fn latest_correlation(
        &self,
        portfolio_id: &PortfolioId,
        lookback_days: u32,
        on_or_before: NaiveDate,
    ) -> Result<Option<(CorrelationCalculation, Vec<PairwiseCorrelation>)>, TraitError>;

    // === Batch bookkeeping ===

    /// Get a batch run by ID.
    async fn get_batch_run(&self, id: &BatchRunId) -> Result<Option<BatchRun>, TraitError>;

    /// Batch runs for a calculation date, most recently started first.
    async fn list_batch_runs(&self, calculation_date: NaiveDate)
        -> Result<Vec<BatchRun>, TraitError>;

    /// Job results for a run, ordered by `recorded_at`.
    async fn get_job_results(&self, id: &BatchRunId) -> Result<Vec<JobResult>, TraitError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{BetaSubject, DataQuality};
    use crate::ids::FactorId;
    use rust_decimal::Decimal;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
    }

    fn factor_row(portfolio: &str, subject: BetaSubject) -> FactorBeta {
        FactorBeta {
            portfolio_id: PortfolioId::new(portfolio),
            subject,
            factor_id: FactorId::new("MKT"),
            calculation_date: date(),
            beta: 1.0,
            dollar_exposure: Decimal::ONE_HUNDRED,
            r_squared: 0.5,
            n_observations: 60,
            quality: DataQuality::Limited,
            skipped_positions: 0,
        }
    }

    #[test]
    fn test_factor_set_keys() {
        let op = WriteOp::FactorBetas {
            portfolio_id: PortfolioId::new("PF"),
            calculation_date: date(),
            rows: vec![
                factor_row("PF", BetaSubject::Portfolio),
                factor_row("PF", BetaSubject::Position("P1".into())),
            ],
        };
        assert!(op.check_keys().is_ok());
        assert_eq!(WriteBatch::single(op).row_count(), 2);

        let op = WriteOp::FactorBetas {
            portfolio_id: PortfolioId::new("PF"),
            calculation_date: date(),
            rows: vec![factor_row("OTHER", BetaSubject::Portfolio)],
        };
        assert!(matches!(op.check_keys(), Err(TraitError::InvalidInput(_))));
    }

    #[test]
    fn test_empty_set_is_valid() {
        let op = WriteOp::Regressions {
            portfolio_id: PortfolioId::new("PF"),
            benchmark: BenchmarkKind::Market,
            calculation_date: date(),
            rows: Vec::new(),
        };
        assert!(op.check_keys().is_ok());
        assert_eq!(op.row_count(), 0);
    }
}
