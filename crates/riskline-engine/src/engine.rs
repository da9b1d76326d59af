//! The risk engine: wires the analytics engines, the job sequence and the
//! batch orchestrator over one set of data sources.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use riskline_traits::analytics::BenchmarkKind;
use riskline_traits::config::EngineConfig;
use riskline_traits::{Availability, BatchRunId, DataSources, PortfolioId, UnavailableReason};

use crate::benchmark::{BenchmarkBetaEngine, BenchmarkBetasView};
use crate::cache::ExposureCache;
use crate::context::EngineContext;
use crate::correlation::{CorrelationEngine, CorrelationMatrix, DiversificationScore};
use crate::error::{EngineError, EngineResult};
use crate::factor_exposure::{FactorExposureEngine, FactorExposureView};
use crate::jobs::{
    BenchmarkBetaJob, CalculationJob, CorrelationsJob, FactorExposuresJob, PositionExposuresJob,
};
use crate::orchestrator::{BatchOrchestrator, BatchRequest, BatchSummary};
use crate::services::{
    AnalyticsService, BatchService, BatchStatusView, CorrelationQuery, JobStatusEntry,
    PortfolioExposures, TriggerResponse, TriggerStatus,
};
use crate::tracker::BatchRunTracker;

/// Batch analytics engine.
pub struct RiskEngine {
    ctx: Arc<EngineContext>,
    cache: Arc<ExposureCache>,
    correlations: Arc<CorrelationEngine>,
    factors: Arc<FactorExposureEngine>,
    benchmarks: Arc<BenchmarkBetaEngine>,
    orchestrator: Arc<BatchOrchestrator>,
    tracker: BatchRunTracker,
    background: Mutex<Option<JoinHandle<BatchSummary>>>,
}

impl RiskEngine {
    /// Create an engine running the standard job sequence.
    pub fn new(sources: DataSources, config: EngineConfig) -> Self {
        let ctx = Arc::new(EngineContext::new(sources, config));
        let cache = Arc::new(ExposureCache::new(ctx.clone()));
        let correlations = Arc::new(CorrelationEngine::new(ctx.clone(), cache.clone()));
        let factors = Arc::new(FactorExposureEngine::new(ctx.clone(), cache.clone()));
        let benchmarks = Arc::new(BenchmarkBetaEngine::new(ctx.clone(), cache.clone()));

        let jobs: Vec<Arc<dyn CalculationJob>> = vec![
            Arc::new(PositionExposuresJob::new(cache.clone())),
            Arc::new(BenchmarkBetaJob::new(benchmarks.clone(), BenchmarkKind::Market)),
            Arc::new(BenchmarkBetaJob::new(
                benchmarks.clone(),
                BenchmarkKind::InterestRate,
            )),
            Arc::new(FactorExposuresJob::new(factors.clone())),
            Arc::new(CorrelationsJob::new(
                correlations.clone(),
                ctx.config.correlation.lookback_days,
            )),
        ];

        let tracker = BatchRunTracker::new();
        let orchestrator = Arc::new(BatchOrchestrator::new(ctx.clone(), jobs, tracker.clone()));

        Self {
            ctx,
            cache,
            correlations,
            factors,
            benchmarks,
            orchestrator,
            tracker,
            background: Mutex::new(None),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Shared calculation context.
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Batch orchestrator.
    pub fn orchestrator(&self) -> &Arc<BatchOrchestrator> {
        &self.orchestrator
    }

    /// Batch run tracker handle.
    pub fn tracker(&self) -> &BatchRunTracker {
        &self.tracker
    }

    /// Factor exposure engine.
    pub fn factor_engine(&self) -> &Arc<FactorExposureEngine> {
        &self.factors
    }

    /// Wait for the most recently triggered background run, if any.
    pub async fn wait_for_background(&self) -> Option<BatchSummary> {
        let handle = self.background.lock().take()?;
        match handle.await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(error = %e, "Background batch task failed");
                None
            }
        }
    }
}

#[async_trait]
impl BatchService for RiskEngine {
    async fn trigger_batch(&self, request: BatchRequest) -> EngineResult<TriggerResponse> {
        match self.orchestrator.prepare(request).await {
            Ok(prepared) => {
                let batch_run_id = prepared.id();
                let orchestrator = self.orchestrator.clone();
                let handle = tokio::spawn(async move { orchestrator.execute(prepared).await });
                *self.background.lock() = Some(handle);
                info!(batch_run = %batch_run_id, "Batch run triggered");
                Ok(TriggerResponse {
                    batch_run_id,
                    status: TriggerStatus::Started,
                })
            }
            Err(EngineError::BatchInProgress(batch_run_id)) => Ok(TriggerResponse {
                batch_run_id,
                status: TriggerStatus::AlreadyRunning,
            }),
            Err(EngineError::AlreadyCompleted(batch_run_id)) => Ok(TriggerResponse {
                batch_run_id,
                status: TriggerStatus::AlreadyCompleted,
            }),
            Err(e) => Err(e),
        }
    }

    async fn run_batch(&self, request: BatchRequest) -> EngineResult<BatchSummary> {
        self.orchestrator.run(request).await
    }

    async fn get_batch_status(
        &self,
        batch_run_id: &BatchRunId,
    ) -> EngineResult<Availability<BatchStatusView>> {
        let gateway = &self.ctx.sources.gateway;
        let Some(run) = gateway.get_batch_run(batch_run_id).await? else {
            return Ok(Availability::unavailable_with(
                UnavailableReason::NoCalculationAvailable,
                format!("no batch run {batch_run_id}"),
            ));
        };

        let mut jobs: Vec<JobStatusEntry> = gateway
            .get_job_results(batch_run_id)
            .await?
            .into_iter()
            .map(|r| JobStatusEntry {
                portfolio_id: r.portfolio_id,
                job_name: r.job_name,
                status: r.status,
                attempts: Some(r.attempts),
                error_category: r.error_category,
                message: r.message,
                rows_written: r.rows_written,
            })
            .collect();

        let (progress_percent, cancel_requested) = match self.tracker.progress(batch_run_id) {
            Some(progress) => {
                for live in self.tracker.job_states() {
                    let recorded = jobs.iter().any(|j| {
                        j.portfolio_id == live.portfolio_id && j.job_name == live.job_name
                    });
                    if !recorded {
                        jobs.push(JobStatusEntry {
                            portfolio_id: live.portfolio_id,
                            job_name: live.job_name,
                            status: live.status,
                            attempts: None,
                            error_category: None,
                            message: None,
                            rows_written: 0,
                        });
                    }
                }
                (progress.percent(), progress.cancel_requested)
            }
            None if run.total_jobs == 0 => (100.0, false),
            None => (
                (run.finished_jobs() as f64 / run.total_jobs as f64 * 100.0).min(100.0),
                false,
            ),
        };

        Ok(Availability::Available(BatchStatusView {
            batch_run_id: run.id,
            calculation_date: run.calculation_date,
            status: run.status,
            started_at: run.started_at,
            finished_at: run.finished_at,
            total_jobs: run.total_jobs,
            progress_percent,
            cancel_requested,
            error: run.error,
            jobs,
        }))
    }

    async fn cancel_batch(&self) -> EngineResult<Option<BatchRunId>> {
        let cancelled = self.tracker.request_cancel();
        if let Some(id) = cancelled {
            info!(batch_run = %id, "Cancellation requested");
        }
        Ok(cancelled)
    }
}

#[async_trait]
impl AnalyticsService for RiskEngine {
    async fn get_portfolio_exposures(
        &self,
        portfolio_id: &PortfolioId,
        as_of: NaiveDate,
    ) -> EngineResult<Availability<PortfolioExposures>> {
        let (snapshot, source) = self
            .cache
            .get_exposures(portfolio_id, as_of, self.ctx.config.exposure.max_staleness_days)
            .await?;
        if snapshot.position_count == 0 {
            return Ok(Availability::unavailable(UnavailableReason::NoPositions));
        }
        Ok(Availability::Available(PortfolioExposures { snapshot, source }))
    }

    async fn get_correlation_matrix(
        &self,
        portfolio_id: &PortfolioId,
        as_of: NaiveDate,
        query: CorrelationQuery,
    ) -> EngineResult<Availability<CorrelationMatrix>> {
        let (lookback_days, min_overlap, max_symbols) =
            query.resolve(&self.ctx.config.correlation);
        self.correlations
            .get_matrix(portfolio_id, lookback_days, min_overlap, max_symbols, as_of)
            .await
    }

    async fn get_diversification_score(
        &self,
        portfolio_id: &PortfolioId,
        as_of: NaiveDate,
        query: CorrelationQuery,
    ) -> EngineResult<Availability<DiversificationScore>> {
        let (lookback_days, min_overlap, _) = query.resolve(&self.ctx.config.correlation);
        self.correlations
            .get_weighted_correlation(portfolio_id, lookback_days, min_overlap, as_of)
            .await
    }

    async fn get_factor_exposures(
        &self,
        portfolio_id: &PortfolioId,
        as_of: NaiveDate,
    ) -> EngineResult<Availability<FactorExposureView>> {
        self.factors.get_factor_exposures(portfolio_id, as_of).await
    }

    async fn get_benchmark_betas(
        &self,
        portfolio_id: &PortfolioId,
        calculation_date: NaiveDate,
    ) -> EngineResult<Availability<BenchmarkBetasView>> {
        self.benchmarks
            .get_portfolio_betas(portfolio_id, calculation_date)
            .await
    }
}
