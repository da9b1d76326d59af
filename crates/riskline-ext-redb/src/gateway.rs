//! Persistence gateway over redb tables.
//!
//! Each [`WriteBatch`] is applied inside one write transaction. A failure on
//! any op aborts the transaction, so partial batches are never visible.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use redb::WriteTransaction;
use tracing::debug;

use riskline_traits::analytics::{
    BenchmarkKind, BetaSubject, CorrelationCalculation, ExposureSnapshot, FactorBeta,
    PairwiseCorrelation, RegressionResult,
};
use riskline_traits::batch::{BatchRun, JobResult};
use riskline_traits::storage::{PersistenceGateway, WriteBatch, WriteOp};
use riskline_traits::{BatchRunId, PortfolioId, TraitError};

use crate::error::StorageResult;
use crate::keys::{
    self, BATCH_RUNS, CORRELATIONS, FACTOR_BETAS, JOB_RESULTS, PAIRS, REGRESSIONS, SNAPSHOTS,
};
use crate::store::{get_in, put, remove_range, RedbStore};

fn apply(txn: &WriteTransaction, op: WriteOp) -> StorageResult<()> {
    match op {
        WriteOp::Regressions {
            portfolio_id,
            benchmark,
            calculation_date,
            rows,
        } => {
            let prefix = keys::regression_prefix(&portfolio_id, benchmark, calculation_date);
            let (lower, upper) = keys::prefix_bounds(&prefix);
            remove_range(txn, REGRESSIONS, &lower, &upper)?;
            for row in &rows {
                let key = keys::regression(
                    &row.portfolio_id,
                    row.benchmark,
                    row.calculation_date,
                    &row.subject,
                );
                put(txn, REGRESSIONS, &key, row)?;
            }
            Ok(())
        }
        WriteOp::FactorBetas {
            portfolio_id,
            calculation_date,
            rows,
        } => {
            let prefix = keys::factor_beta_prefix(&portfolio_id, calculation_date);
            let (lower, upper) = keys::prefix_bounds(&prefix);
            remove_range(txn, FACTOR_BETAS, &lower, &upper)?;
            for row in &rows {
                let key = keys::factor_beta(
                    &row.portfolio_id,
                    row.calculation_date,
                    &row.factor_id,
                    &row.subject,
                );
                put(txn, FACTOR_BETAS, &key, row)?;
            }
            Ok(())
        }
        WriteOp::ExposureSnapshot(row) => {
            let key = keys::snapshot(&row.portfolio_id, row.calculation_date);
            put(txn, SNAPSHOTS, &key, &row)
        }
        WriteOp::Correlation { header, pairs } => {
            let key = keys::correlation(
                &header.portfolio_id,
                header.lookback_days,
                header.calculation_date,
            );
            // A rerun for the same key replaces the previous pair set
            if let Some(previous) = get_in::<CorrelationCalculation>(txn, CORRELATIONS, &key)? {
                let (lower, upper) = keys::prefix_bounds(&keys::calculation_prefix(&previous.id));
                remove_range(txn, PAIRS, &lower, &upper)?;
            }
            put(txn, CORRELATIONS, &key, &header)?;
            for pair in &pairs {
                let pair_key = keys::pair(&header.id, &pair.symbol_a, &pair.symbol_b);
                put(txn, PAIRS, &pair_key, pair)?;
            }
            Ok(())
        }
        WriteOp::BatchRun(run) => put(txn, BATCH_RUNS, &run.id.to_string(), &run),
        WriteOp::JobResult(row) => {
            let key = keys::job_result(&row.batch_run_id, &row.job_name, &row.portfolio_id);
            put(txn, JOB_RESULTS, &key, &row)
        }
    }
}

#[async_trait]
impl PersistenceGateway for RedbStore {
    async fn health_check(&self) -> Result<(), TraitError> {
        self.ping()
            .map_err(|e| TraitError::ConnectionFailed(e.to_string()))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), TraitError> {
        let ops = batch.len();
        let rows = batch.row_count();
        for op in batch.ops() {
            op.check_keys()?;
        }
        self.write(|txn| {
            for op in batch.into_ops() {
                apply(txn, op)?;
            }
            Ok(())
        })?;
        debug!(ops, rows, "Committed write batch");
        Ok(())
    }

    async fn latest_exposure_snapshot(
        &self,
        portfolio_id: &PortfolioId,
        on_or_before: NaiveDate,
    ) -> Result<Option<ExposureSnapshot>, TraitError> {
        let (lower, upper) = keys::through_date(&keys::portfolio_prefix(portfolio_id), on_or_before);
        Ok(self.last_in(SNAPSHOTS, &lower, &upper)?)
    }

    async fn get_regression_results(
        &self,
        portfolio_id: &PortfolioId,
        benchmark: BenchmarkKind,
        calculation_date: NaiveDate,
    ) -> Result<Vec<RegressionResult>, TraitError> {
        let prefix = keys::regression_prefix(portfolio_id, benchmark, calculation_date);
        let (lower, upper) = keys::prefix_bounds(&prefix);
        let mut rows: Vec<RegressionResult> = self.scan(REGRESSIONS, &lower, &upper)?;
        rows.retain(|r| r.portfolio_id == *portfolio_id);
        Ok(rows)
    }

    async fn get_factor_betas(
        &self,
        portfolio_id: &PortfolioId,
        calculation_date: NaiveDate,
    ) -> Result<Vec<FactorBeta>, TraitError> {
        let prefix = keys::factor_beta_prefix(portfolio_id, calculation_date);
        let (lower, upper) = keys::prefix_bounds(&prefix);
        let mut rows: Vec<FactorBeta> = self.scan(FACTOR_BETAS, &lower, &upper)?;
        rows.retain(|r| r.portfolio_id == *portfolio_id);
        Ok(rows)
    }

    async fn factor_beta_dates(
        &self,
        portfolio_id: &PortfolioId,
        on_or_before: NaiveDate,
    ) -> Result<Vec<NaiveDate>, TraitError> {
        let (lower, upper) = keys::through_date(&keys::portfolio_prefix(portfolio_id), on_or_before);
        let rows: Vec<FactorBeta> = self.scan(FACTOR_BETAS, &lower, &upper)?;
        let dates: BTreeSet<NaiveDate> = rows
            .into_iter()
            .filter(|row| {
                row.portfolio_id == *portfolio_id && row.subject == BetaSubject::Portfolio
            })
            .map(|row| row.calculation_date)
            .collect();
        Ok(dates.into_iter().rev().collect())
    }

    async fn latest_correlation(
        &self,
        portfolio_id: &PortfolioId,
        lookback_days: u32,
        on_or_before: NaiveDate,
    ) -> Result<Option<(CorrelationCalculation, Vec<PairwiseCorrelation>)>, TraitError> {
        let prefix = keys::correlation_prefix(portfolio_id, lookback_days);
        let (lower, upper) = keys::through_date(&prefix, on_or_before);
        let Some(header) = self.last_in::<CorrelationCalculation>(CORRELATIONS, &lower, &upper)?
        else {
            return Ok(None);
        };

        let (lower, upper) = keys::prefix_bounds(&keys::calculation_prefix(&header.id));
        let pairs = self.scan(PAIRS, &lower, &upper)?;
        Ok(Some((header, pairs)))
    }

    async fn get_batch_run(&self, id: &BatchRunId) -> Result<Option<BatchRun>, TraitError> {
        Ok(self.fetch(BATCH_RUNS, &id.to_string())?)
    }

    async fn list_batch_runs(
        &self,
        calculation_date: NaiveDate,
    ) -> Result<Vec<BatchRun>, TraitError> {
        let mut runs: Vec<BatchRun> = self
            .scan_all::<BatchRun>(BATCH_RUNS)?
            .into_iter()
            .filter(|run| run.calculation_date == calculation_date)
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn get_job_results(&self, id: &BatchRunId) -> Result<Vec<JobResult>, TraitError> {
        let (lower, upper) = keys::prefix_bounds(&keys::batch_run_prefix(id));
        let mut results: Vec<JobResult> = self.scan(JOB_RESULTS, &lower, &upper)?;
        results.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(results)
    }
}
