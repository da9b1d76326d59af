//! Batch orchestration.
//!
//! A run processes portfolios one at a time and, for each, executes the fixed
//! job sequence through the [`JobRunner`]. A terminal failure of a critical
//! job skips the rest of that portfolio's sequence only. Cancellation is
//! honoured between portfolios. Every job produces a [`JobResult`] row and the
//! [`BatchRun`] header is finalised with aggregated counts.
//!
//! ```text
//! prepare:  health check -> resolve portfolios -> reserve tracker -> commit header
//! execute:  for portfolio { for job { run | skip } } -> finalise header
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use riskline_traits::batch::{BatchRun, BatchStatus, ErrorCategory, JobStatus};
use riskline_traits::portfolio::Portfolio;
use riskline_traits::storage::{WriteBatch, WriteOp};
use riskline_traits::{BatchRunId, PortfolioId};

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::jobs::CalculationJob;
use crate::runner::{panic_message, JobExecution, JobRunner, RetryPolicy};
use crate::tracker::BatchRunTracker;

/// What to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Date to calculate for
    pub calculation_date: NaiveDate,
    /// Portfolios to include; every active portfolio when `None`
    #[serde(default)]
    pub portfolio_ids: Option<Vec<PortfolioId>>,
    /// Run even if a completed run already covers the request
    #[serde(default)]
    pub force: bool,
}

impl BatchRequest {
    /// All active portfolios for a date.
    pub fn for_date(calculation_date: NaiveDate) -> Self {
        Self {
            calculation_date,
            portfolio_ids: None,
            force: false,
        }
    }

    /// Restrict to specific portfolios.
    pub fn with_portfolios(mut self, ids: Vec<PortfolioId>) -> Self {
        self.portfolio_ids = Some(ids);
        self
    }

    /// Ignore earlier completed runs.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// A failed job in the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob {
    /// Portfolio
    pub portfolio_id: PortfolioId,
    /// Job name
    pub job_name: String,
    /// Terminal failure status
    pub status: JobStatus,
    /// Error category
    pub error_category: Option<ErrorCategory>,
    /// Error message
    pub message: Option<String>,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Run id
    pub batch_run_id: BatchRunId,
    /// Calculation date
    pub calculation_date: NaiveDate,
    /// Final status
    pub status: BatchStatus,
    /// Planned jobs
    pub total_jobs: usize,
    /// Jobs finished in `Success` (including insufficient-data successes)
    pub succeeded: usize,
    /// Successes that produced no result for lack of data
    pub insufficient_data: usize,
    /// Jobs in a failure state
    pub failed: usize,
    /// Jobs skipped after a critical failure
    pub skipped: usize,
    /// Portfolios never started because of cancellation
    pub cancelled_portfolios: usize,
    /// Total wall-clock milliseconds per job name
    pub job_durations_ms: BTreeMap<String, u64>,
    /// Failures in execution order
    pub failed_jobs: Vec<FailedJob>,
    /// `portfolio/job` pairs whose result row could not be committed
    #[serde(default)]
    pub unrecorded_jobs: Vec<String>,
    /// Run duration
    pub duration_ms: u64,
}

impl BatchSummary {
    fn new(run: &BatchRun) -> Self {
        Self {
            batch_run_id: run.id,
            calculation_date: run.calculation_date,
            status: BatchStatus::Running,
            total_jobs: run.total_jobs,
            succeeded: 0,
            insufficient_data: 0,
            failed: 0,
            skipped: 0,
            cancelled_portfolios: 0,
            job_durations_ms: BTreeMap::new(),
            failed_jobs: Vec::new(),
            unrecorded_jobs: Vec::new(),
            duration_ms: 0,
        }
    }

    fn record(&mut self, execution: &JobExecution) {
        *self
            .job_durations_ms
            .entry(execution.job_name.clone())
            .or_insert(0) += execution.duration.as_millis() as u64;

        match execution.status {
            JobStatus::Success => {
                self.succeeded += 1;
                if execution.is_insufficient_data() {
                    self.insufficient_data += 1;
                }
            }
            JobStatus::Skipped => self.skipped += 1,
            status if status.is_failure() => {
                self.failed += 1;
                self.failed_jobs.push(FailedJob {
                    portfolio_id: execution.portfolio_id.clone(),
                    job_name: execution.job_name.clone(),
                    status,
                    error_category: execution.error_category,
                    message: execution.message.clone(),
                });
            }
            _ => {}
        }
    }

    fn final_status(&self) -> BatchStatus {
        if self.cancelled_portfolios > 0 {
            BatchStatus::Cancelled
        } else if self.failed > 0 {
            BatchStatus::CompletedWithFailures
        } else {
            BatchStatus::Completed
        }
    }
}

/// A run whose header has been committed and whose tracker slot is held.
///
/// Dropping it, executed or not, releases the tracker slot.
#[derive(Debug)]
pub struct PreparedRun {
    run: BatchRun,
    portfolios: Vec<Portfolio>,
    release: TrackerRelease,
}

impl PreparedRun {
    /// Run id.
    pub fn id(&self) -> BatchRunId {
        self.run.id
    }

    /// Committed header.
    pub fn header(&self) -> &BatchRun {
        &self.run
    }
}

/// Drives batch runs.
pub struct BatchOrchestrator {
    ctx: Arc<EngineContext>,
    jobs: Vec<Arc<dyn CalculationJob>>,
    runner: JobRunner,
    tracker: BatchRunTracker,
}

impl BatchOrchestrator {
    /// Create an orchestrator over a fixed job sequence.
    pub fn new(
        ctx: Arc<EngineContext>,
        jobs: Vec<Arc<dyn CalculationJob>>,
        tracker: BatchRunTracker,
    ) -> Self {
        let runner = JobRunner::new(
            ctx.sources.gateway.clone(),
            RetryPolicy::from(&ctx.config.batch),
        );
        Self {
            ctx,
            jobs,
            runner,
            tracker,
        }
    }

    /// Job names in execution order.
    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.name().to_string()).collect()
    }

    /// Shared tracker handle.
    pub fn tracker(&self) -> &BatchRunTracker {
        &self.tracker
    }

    /// Run a batch to completion.
    pub async fn run(&self, request: BatchRequest) -> EngineResult<BatchSummary> {
        let prepared = self.prepare(request).await?;
        Ok(self.execute(prepared).await)
    }

    /// Validate the request, reserve the tracker and commit the run header.
    pub async fn prepare(&self, request: BatchRequest) -> EngineResult<PreparedRun> {
        if let Some(active) = self.tracker.active_run_id() {
            return Err(EngineError::BatchInProgress(active));
        }

        let gateway = &self.ctx.sources.gateway;
        if let Err(e) = gateway.health_check().await {
            error!(error = %e, "Persistence gateway health check failed");
            return Err(EngineError::RunFatal(format!("health check failed: {e}")));
        }

        let portfolios = self.resolve_portfolios(&request).await?;
        let portfolio_ids: Vec<PortfolioId> = portfolios.iter().map(|p| p.id.clone()).collect();

        if !request.force {
            let runs = gateway.list_batch_runs(request.calculation_date).await?;
            let covering = runs.into_iter().find(|run| {
                run.status == BatchStatus::Completed
                    && portfolio_ids.iter().all(|id| run.portfolio_ids.contains(id))
            });
            if let Some(run) = covering {
                return Err(EngineError::AlreadyCompleted(run.id));
            }
        }

        let run = BatchRun::start(
            BatchRunId::generate(),
            request.calculation_date,
            portfolio_ids,
            self.jobs.len(),
        );
        self.tracker
            .try_begin(run.id, run.calculation_date, run.total_jobs)
            .map_err(EngineError::BatchInProgress)?;
        let release = TrackerRelease {
            tracker: self.tracker.clone(),
            id: run.id,
        };

        if let Err(e) = gateway.commit(WriteBatch::single(WriteOp::BatchRun(run.clone()))).await {
            drop(release);
            error!(batch_run = %run.id, error = %e, "Failed to record batch run");
            return Err(EngineError::RunFatal(format!("failed to record batch run: {e}")));
        }

        info!(
            batch_run = %run.id,
            date = %run.calculation_date,
            portfolios = run.portfolio_ids.len(),
            total_jobs = run.total_jobs,
            "Batch run started"
        );

        Ok(PreparedRun {
            run,
            portfolios,
            release,
        })
    }

    /// Execute a prepared run and finalise its header.
    ///
    /// A panic escaping the job loop ends the run as [`BatchStatus::Failed`]
    /// with the panic text in the header's `error`.
    pub async fn execute(&self, prepared: PreparedRun) -> BatchSummary {
        let PreparedRun {
            mut run,
            portfolios,
            release: _release,
        } = prepared;
        let started = Instant::now();
        let mut summary = BatchSummary::new(&run);

        let outcome = AssertUnwindSafe(self.process(&run, &portfolios, &mut summary))
            .catch_unwind()
            .await;
        summary.status = match outcome {
            Ok(()) => summary.final_status(),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(batch_run = %run.id, panic = %message, "Batch run aborted");
                run.error = Some(format!("batch aborted: {message}"));
                BatchStatus::Failed
            }
        };
        summary.duration_ms = started.elapsed().as_millis() as u64;

        if !summary.unrecorded_jobs.is_empty() {
            let gap = format!(
                "job results not recorded: {}",
                summary.unrecorded_jobs.join(", ")
            );
            run.error = Some(match run.error.take() {
                Some(existing) => format!("{existing}; {gap}"),
                None => gap,
            });
        }

        run.status = summary.status;
        run.finished_at = Some(Utc::now());
        run.succeeded = summary.succeeded;
        run.failed = summary.failed;
        run.skipped = summary.skipped;
        run.cancelled_portfolios = summary.cancelled_portfolios;

        if let Err(e) = self
            .ctx
            .sources
            .gateway
            .commit(WriteBatch::single(WriteOp::BatchRun(run.clone())))
            .await
        {
            error!(batch_run = %run.id, error = %e, "Failed to finalise batch run");
        }

        info!(
            batch_run = %run.id,
            status = %summary.status,
            succeeded = summary.succeeded,
            insufficient_data = summary.insufficient_data,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled_portfolios = summary.cancelled_portfolios,
            duration_ms = summary.duration_ms,
            "Batch run finished"
        );

        summary
    }

    async fn process(&self, run: &BatchRun, portfolios: &[Portfolio], summary: &mut BatchSummary) {
        let config = &self.ctx.config.batch;

        for (index, portfolio) in portfolios.iter().enumerate() {
            if self.tracker.is_cancel_requested() {
                summary.cancelled_portfolios = portfolios.len() - index;
                warn!(
                    batch_run = %run.id,
                    remaining = summary.cancelled_portfolios,
                    "Batch run cancelled"
                );
                break;
            }

            info!(
                batch_run = %run.id,
                portfolio = %portfolio.id,
                position = index + 1,
                of = portfolios.len(),
                "Processing portfolio"
            );

            let mut critical_failure: Option<String> = None;
            for job in &self.jobs {
                let execution = match &critical_failure {
                    Some(failed) => {
                        self.tracker
                            .transition(&portfolio.id, job.name(), JobStatus::Skipped);
                        JobExecution::skipped(
                            job.name(),
                            portfolio.id.clone(),
                            format!("critical job {failed} failed"),
                        )
                    }
                    None => {
                        self.runner
                            .run(job.as_ref(), portfolio, run.calculation_date, &self.tracker)
                            .await
                    }
                };

                if execution.status.is_failure() && config.is_critical(&execution.job_name) {
                    warn!(
                        portfolio = %portfolio.id,
                        job = %execution.job_name,
                        "Critical job failed, skipping remaining jobs for portfolio"
                    );
                    critical_failure = Some(execution.job_name.clone());
                }

                if !self.record(run, &execution).await {
                    summary
                        .unrecorded_jobs
                        .push(format!("{}/{}", execution.portfolio_id, execution.job_name));
                }
                summary.record(&execution);
            }
        }
    }

    async fn resolve_portfolios(&self, request: &BatchRequest) -> EngineResult<Vec<Portfolio>> {
        let mut portfolios = match &request.portfolio_ids {
            Some(ids) => {
                let mut found = Vec::with_capacity(ids.len());
                for id in ids {
                    found.push(self.ctx.portfolio(id).await?);
                }
                found
            }
            None => self.ctx.sources.portfolios.list_active().await?,
        };
        portfolios.sort_by(|a, b| a.id.cmp(&b.id));
        portfolios.dedup_by(|a, b| a.id == b.id);
        Ok(portfolios)
    }

    /// Persist the job's result row. Returns false when the commit failed.
    async fn record(&self, run: &BatchRun, execution: &JobExecution) -> bool {
        let row = execution.to_result(run.id);
        match self
            .ctx
            .sources
            .gateway
            .commit(WriteBatch::single(WriteOp::JobResult(row)))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    batch_run = %run.id,
                    portfolio = %execution.portfolio_id,
                    job = %execution.job_name,
                    error = %e,
                    "Failed to record job result"
                );
                false
            }
        }
    }
}

/// Releases the tracker slot when dropped.
struct TrackerRelease {
    tracker: BatchRunTracker,
    id: BatchRunId,
}

impl fmt::Debug for TrackerRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerRelease").field("id", &self.id).finish()
    }
}

impl Drop for TrackerRelease {
    fn drop(&mut self) {
        self.tracker.finish(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn execution(job: &str, status: JobStatus, category: Option<ErrorCategory>) -> JobExecution {
        JobExecution {
            job_name: job.to_string(),
            portfolio_id: PortfolioId::new("PF"),
            status,
            attempts: 1,
            error_category: category,
            message: None,
            duration: Duration::from_millis(5),
            rows_written: 0,
        }
    }

    fn run() -> BatchRun {
        BatchRun::start(
            BatchRunId::generate(),
            NaiveDate::from_ymd_opt(2024, 6, 28).unwrap(),
            vec![PortfolioId::new("PF")],
            4,
        )
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = BatchSummary::new(&run());
        summary.record(&execution("a", JobStatus::Success, None));
        summary.record(&execution(
            "b",
            JobStatus::Success,
            Some(ErrorCategory::InsufficientData),
        ));
        summary.record(&execution(
            "c",
            JobStatus::FailedPermanent,
            Some(ErrorCategory::PermanentCalculation),
        ));
        summary.record(&JobExecution::skipped("d", PortfolioId::new("PF"), "x"));

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.insufficient_data, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed_jobs[0].job_name, "c");
        assert_eq!(summary.job_durations_ms["a"], 5);
        assert_eq!(summary.final_status(), BatchStatus::CompletedWithFailures);
    }

    #[test]
    fn test_cancel_wins_over_failures() {
        let mut summary = BatchSummary::new(&run());
        summary.record(&execution(
            "a",
            JobStatus::FailedTransientExhausted,
            Some(ErrorCategory::TransientInfra),
        ));
        summary.cancelled_portfolios = 1;
        assert_eq!(summary.final_status(), BatchStatus::Cancelled);
    }

    #[test]
    fn test_request_builders() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 28).unwrap();
        let request = BatchRequest::for_date(date)
            .with_portfolios(vec![PortfolioId::new("A")])
            .forced();
        assert!(request.force);
        assert_eq!(request.portfolio_ids.unwrap().len(), 1);
    }
}
