//! Service traits exposed by the risk engine.
//!
//! - **BatchService**: triggering, awaiting, inspecting and cancelling batch runs
//! - **AnalyticsService**: canonical reads of persisted analytics
//!
//! Reads return [`Availability`] so callers can tell "nothing computed yet"
//! from a defect, which is always an `Err`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use riskline_traits::analytics::{ExposureSnapshot, ExposureSource};
use riskline_traits::batch::{BatchStatus, ErrorCategory, JobStatus};
use riskline_traits::config::CorrelationConfig;
use riskline_traits::{Availability, BatchRunId, PortfolioId};

use crate::benchmark::BenchmarkBetasView;
use crate::correlation::{CorrelationMatrix, DiversificationScore};
use crate::error::EngineResult;
use crate::factor_exposure::FactorExposureView;
use crate::orchestrator::{BatchRequest, BatchSummary};

// =============================================================================
// BATCH SERVICE
// =============================================================================

/// Result of a trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    /// A new run was started in the background
    Started,
    /// Another run holds the tracker
    AlreadyRunning,
    /// A completed run already covers the request
    AlreadyCompleted,
}

/// Response to [`BatchService::trigger_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    /// The started, running or completed run
    pub batch_run_id: BatchRunId,
    /// What happened
    pub status: TriggerStatus,
}

/// One job in a status view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusEntry {
    /// Portfolio
    pub portfolio_id: PortfolioId,
    /// Job name
    pub job_name: String,
    /// Current or terminal status
    pub status: JobStatus,
    /// Attempts made, once terminal
    pub attempts: Option<u32>,
    /// Error category
    pub error_category: Option<ErrorCategory>,
    /// Detail or error message
    pub message: Option<String>,
    /// Rows committed
    pub rows_written: usize,
}

/// Status of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusView {
    /// Run id
    pub batch_run_id: BatchRunId,
    /// Calculation date
    pub calculation_date: NaiveDate,
    /// Run status
    pub status: BatchStatus,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: Option<DateTime<Utc>>,
    /// Planned jobs
    pub total_jobs: usize,
    /// Percentage of planned jobs in a terminal state
    pub progress_percent: f64,
    /// Whether cancellation has been requested
    pub cancel_requested: bool,
    /// Run-level error, including job results that could not be recorded
    pub error: Option<String>,
    /// Per-job states
    pub jobs: Vec<JobStatusEntry>,
}

/// Batch lifecycle operations.
#[async_trait]
pub trait BatchService: Send + Sync {
    /// Start a run in the background.
    async fn trigger_batch(&self, request: BatchRequest) -> EngineResult<TriggerResponse>;

    /// Run a batch and wait for it to finish.
    async fn run_batch(&self, request: BatchRequest) -> EngineResult<BatchSummary>;

    /// Status of a run, live if it is executing.
    async fn get_batch_status(
        &self,
        batch_run_id: &BatchRunId,
    ) -> EngineResult<Availability<BatchStatusView>>;

    /// Request cancellation of the active run; returns its id.
    async fn cancel_batch(&self) -> EngineResult<Option<BatchRunId>>;
}

// =============================================================================
// ANALYTICS SERVICE
// =============================================================================

/// Exposure read payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioExposures {
    /// Snapshot served
    #[serde(flatten)]
    pub snapshot: ExposureSnapshot,
    /// Cache hit or recomputation
    pub source: ExposureSource,
}

/// Correlation read parameters; unset fields use the configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationQuery {
    /// Lookback window in days
    pub lookback_days: Option<u32>,
    /// Minimum overlapping observations per pair
    pub min_overlap: Option<usize>,
    /// Matrix size limit
    pub max_symbols: Option<usize>,
}

impl CorrelationQuery {
    /// `(lookback_days, min_overlap, max_symbols)` with defaults applied.
    pub fn resolve(&self, defaults: &CorrelationConfig) -> (u32, usize, usize) {
        (
            self.lookback_days.unwrap_or(defaults.lookback_days),
            self.min_overlap.unwrap_or(defaults.min_overlap),
            self.max_symbols.unwrap_or(defaults.max_symbols),
        )
    }
}

/// Canonical analytics reads.
#[async_trait]
pub trait AnalyticsService: Send + Sync {
    /// Net/gross exposure, from cache when fresh enough.
    async fn get_portfolio_exposures(
        &self,
        portfolio_id: &PortfolioId,
        as_of: NaiveDate,
    ) -> EngineResult<Availability<PortfolioExposures>>;

    /// Display correlation matrix.
    async fn get_correlation_matrix(
        &self,
        portfolio_id: &PortfolioId,
        as_of: NaiveDate,
        query: CorrelationQuery,
    ) -> EngineResult<Availability<CorrelationMatrix>>;

    /// Weighted diversification score.
    async fn get_diversification_score(
        &self,
        portfolio_id: &PortfolioId,
        as_of: NaiveDate,
        query: CorrelationQuery,
    ) -> EngineResult<Availability<DiversificationScore>>;

    /// Factor exposures from the latest complete factor set.
    async fn get_factor_exposures(
        &self,
        portfolio_id: &PortfolioId,
        as_of: NaiveDate,
    ) -> EngineResult<Availability<FactorExposureView>>;

    /// Portfolio market and interest-rate betas for a date.
    async fn get_benchmark_betas(
        &self,
        portfolio_id: &PortfolioId,
        calculation_date: NaiveDate,
    ) -> EngineResult<Availability<BenchmarkBetasView>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults() {
        let defaults = CorrelationConfig::default();
        let query = CorrelationQuery {
            min_overlap: Some(5),
            ..CorrelationQuery::default()
        };
        assert_eq!(query.resolve(&defaults), (90, 5, 25));
    }

    #[test]
    fn test_trigger_wire_names() {
        let json = serde_json::to_string(&TriggerStatus::AlreadyRunning).unwrap();
        assert_eq!(json, "\"already_running\"");
    }
}
