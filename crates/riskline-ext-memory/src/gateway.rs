//! Persistence gateway over in-memory tables.
//!
//! `commit` takes the table write lock once and applies every op of the batch
//! under it, so readers see either none or all of a batch.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chrono::NaiveDate;

use riskline_traits::analytics::{
    BenchmarkKind, BetaSubject, CorrelationCalculation, ExposureSnapshot, FactorBeta,
    PairwiseCorrelation, RegressionResult,
};
use riskline_traits::batch::{BatchRun, JobResult};
use riskline_traits::storage::{PersistenceGateway, WriteBatch, WriteOp};
use riskline_traits::{BatchRunId, PortfolioId, TraitError};

use crate::{MemoryStore, Tables};

impl Tables {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::Regressions {
                portfolio_id,
                benchmark,
                calculation_date,
                rows,
            } => {
                self.regressions.retain(|(pid, kind, date, _), _| {
                    !(*pid == portfolio_id && *kind == benchmark && *date == calculation_date)
                });
                for row in rows {
                    let key = (
                        row.portfolio_id.clone(),
                        row.benchmark,
                        row.calculation_date,
                        row.subject.clone(),
                    );
                    self.regressions.insert(key, row);
                }
            }
            WriteOp::FactorBetas {
                portfolio_id,
                calculation_date,
                rows,
            } => {
                self.factor_betas.retain(|(pid, date, _, _), _| {
                    !(*pid == portfolio_id && *date == calculation_date)
                });
                for row in rows {
                    let key = (
                        row.portfolio_id.clone(),
                        row.calculation_date,
                        row.factor_id.clone(),
                        row.subject.clone(),
                    );
                    self.factor_betas.insert(key, row);
                }
            }
            WriteOp::ExposureSnapshot(row) => {
                let key = (row.portfolio_id.clone(), row.calculation_date);
                self.snapshots.insert(key, row);
            }
            WriteOp::Correlation { header, pairs } => {
                let key = (
                    header.portfolio_id.clone(),
                    header.lookback_days,
                    header.calculation_date,
                );
                if let Some(previous) = self.correlations.insert(key, header.clone()) {
                    self.pairs.remove(&previous.id);
                }
                let set = self.pairs.entry(header.id).or_default();
                for pair in pairs {
                    set.insert((pair.symbol_a.clone(), pair.symbol_b.clone()), pair);
                }
            }
            WriteOp::BatchRun(run) => {
                self.batch_runs.insert(run.id, run);
            }
            WriteOp::JobResult(row) => {
                let key = (row.batch_run_id, row.job_name.clone(), row.portfolio_id.clone());
                self.job_results.insert(key, row);
            }
        }
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn health_check(&self) -> Result<(), TraitError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(TraitError::ConnectionFailed("store marked unhealthy".into()));
        }
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), TraitError> {
        if let Some(fault) = self.commit_faults.lock().pop_front() {
            return Err(fault);
        }
        for op in batch.ops() {
            op.check_keys()?;
        }

        let mut tables = self.tables.write();
        for op in batch.into_ops() {
            tables.apply(op);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn latest_exposure_snapshot(
        &self,
        portfolio_id: &PortfolioId,
        on_or_before: NaiveDate,
    ) -> Result<Option<ExposureSnapshot>, TraitError> {
        let tables = self.tables.read();
        Ok(tables
            .snapshots
            .range((portfolio_id.clone(), NaiveDate::MIN)..=(portfolio_id.clone(), on_or_before))
            .next_back()
            .map(|(_, row)| row.clone()))
    }

    async fn get_regression_results(
        &self,
        portfolio_id: &PortfolioId,
        benchmark: BenchmarkKind,
        calculation_date: NaiveDate,
    ) -> Result<Vec<RegressionResult>, TraitError> {
        let tables = self.tables.read();
        Ok(tables
            .regressions
            .iter()
            .filter(|((pid, kind, date, _), _)| {
                pid == portfolio_id && *kind == benchmark && *date == calculation_date
            })
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn get_factor_betas(
        &self,
        portfolio_id: &PortfolioId,
        calculation_date: NaiveDate,
    ) -> Result<Vec<FactorBeta>, TraitError> {
        let tables = self.tables.read();
        Ok(tables
            .factor_betas
            .iter()
            .filter(|((pid, date, _, _), _)| pid == portfolio_id && *date == calculation_date)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn factor_beta_dates(
        &self,
        portfolio_id: &PortfolioId,
        on_or_before: NaiveDate,
    ) -> Result<Vec<NaiveDate>, TraitError> {
        let tables = self.tables.read();
        let dates: BTreeSet<NaiveDate> = tables
            .factor_betas
            .keys()
            .filter(|(pid, date, _, subject)| {
                pid == portfolio_id && *date <= on_or_before && *subject == BetaSubject::Portfolio
            })
            .map(|(_, date, _, _)| *date)
            .collect();
        Ok(dates.into_iter().rev().collect())
    }

    async fn latest_correlation(
        &self,
        portfolio_id: &PortfolioId,
        lookback_days: u32,
        on_or_before: NaiveDate,
    ) -> Result<Option<(CorrelationCalculation, Vec<PairwiseCorrelation>)>, TraitError> {
        let tables = self.tables.read();
        let header = tables
            .correlations
            .range(
                (portfolio_id.clone(), lookback_days, NaiveDate::MIN)
                    ..=(portfolio_id.clone(), lookback_days, on_or_before),
            )
            .next_back()
            .map(|(_, header)| header.clone());

        Ok(header.map(|header| {
            let pairs = tables
                .pairs
                .get(&header.id)
                .map(|set| set.values().cloned().collect())
                .unwrap_or_default();
            (header, pairs)
        }))
    }

    async fn get_batch_run(&self, id: &BatchRunId) -> Result<Option<BatchRun>, TraitError> {
        Ok(self.tables.read().batch_runs.get(id).cloned())
    }

    async fn list_batch_runs(
        &self,
        calculation_date: NaiveDate,
    ) -> Result<Vec<BatchRun>, TraitError> {
        let mut runs: Vec<BatchRun> = self
            .tables
            .read()
            .batch_runs
            .values()
            .filter(|run| run.calculation_date == calculation_date)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn get_job_results(&self, id: &BatchRunId) -> Result<Vec<JobResult>, TraitError> {
        let mut results: Vec<JobResult> = self
            .tables
            .read()
            .job_results
            .iter()
            .filter(|((run_id, _, _), _)| run_id == id)
            .map(|(_, row)| row.clone())
            .collect();
        results.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(results)
    }
}
