//! Batch run and job result records.
//!
//! A [`BatchRun`] is created when a batch starts and finalised when the
//! portfolio loop ends. [`JobResult`] rows are appended as jobs execute and
//! belong to exactly one run.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BatchRunId, PortfolioId};

// =============================================================================
// JOB STATE MACHINE
// =============================================================================

/// Lifecycle state of a single job for a single portfolio.
///
/// ```text
/// Pending -> Running -> Success
///               |  ^ -> FailedPermanent
///               v  |  -> FailedTransientExhausted
///           RetryWait
/// Pending -> Skipped   (critical job failed earlier for this portfolio)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Not started
    Pending,
    /// Attempt in progress
    Running,
    /// Waiting for backoff before the next attempt
    RetryWait,
    /// Completed and committed
    Success,
    /// Retryable failure with all attempts used
    FailedTransientExhausted,
    /// Non-retryable failure
    FailedPermanent,
    /// Not run because a critical job failed for the same portfolio
    Skipped,
}

impl JobStatus {
    /// True once no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success
                | JobStatus::FailedTransientExhausted
                | JobStatus::FailedPermanent
                | JobStatus::Skipped
        )
    }

    /// True for the two failure states.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::FailedTransientExhausted | JobStatus::FailedPermanent
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Skipped)
                | (Running, Success)
                | (Running, RetryWait)
                | (Running, FailedTransientExhausted)
                | (Running, FailedPermanent)
                | (RetryWait, Running)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::RetryWait => "RETRY_WAIT",
            JobStatus::Success => "SUCCESS",
            JobStatus::FailedTransientExhausted => "FAILED_TRANSIENT_EXHAUSTED",
            JobStatus::FailedPermanent => "FAILED_PERMANENT",
            JobStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Typed error category recorded against a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input series
    InputValidation,
    /// Below minimum window/observations
    InsufficientData,
    /// Timeout or connection failure
    TransientInfra,
    /// Rejected concurrent commit; nothing was applied
    ConcurrencyArtifact,
    /// Logic or precondition violation
    PermanentCalculation,
}

impl ErrorCategory {
    /// Whether the job runner may retry errors of this category.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::TransientInfra | ErrorCategory::ConcurrencyArtifact
        )
    }
}

// =============================================================================
// BATCH RUN
// =============================================================================

/// Overall state of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Portfolio loop in progress
    Running,
    /// Every job succeeded (or was intentionally skipped with no failures)
    Completed,
    /// Finished, at least one job failed
    CompletedWithFailures,
    /// Stopped between portfolios at the caller's request
    Cancelled,
    /// Aborted by a run-fatal error
    Failed,
}

impl BatchStatus {
    /// True once the run has ended.
    pub fn is_finished(&self) -> bool {
        !matches!(self, BatchStatus::Running)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::CompletedWithFailures => "completed_with_failures",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A batch run header with aggregated counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    /// Run identifier
    pub id: BatchRunId,
    /// Date the run calculates for
    pub calculation_date: NaiveDate,
    /// Current status
    pub status: BatchStatus,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time (None while running)
    pub finished_at: Option<DateTime<Utc>>,
    /// Portfolios in scope, in processing order
    pub portfolio_ids: Vec<PortfolioId>,
    /// Planned jobs (portfolios x job sequence)
    pub total_jobs: usize,
    /// Jobs finished in `Success`
    pub succeeded: usize,
    /// Jobs finished in a failure state
    pub failed: usize,
    /// Jobs skipped after a critical failure
    pub skipped: usize,
    /// Portfolios not processed because of cancellation
    pub cancelled_portfolios: usize,
    /// Run-fatal error, if any
    #[serde(default)]
    pub error: Option<String>,
}

impl BatchRun {
    /// Create a new running batch.
    pub fn start(
        id: BatchRunId,
        calculation_date: NaiveDate,
        portfolio_ids: Vec<PortfolioId>,
        jobs_per_portfolio: usize,
    ) -> Self {
        let total_jobs = portfolio_ids.len() * jobs_per_portfolio;
        Self {
            id,
            calculation_date,
            status: BatchStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            portfolio_ids,
            total_jobs,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            cancelled_portfolios: 0,
            error: None,
        }
    }

    /// Jobs that reached a terminal state.
    pub fn finished_jobs(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

// =============================================================================
// JOB RESULT
// =============================================================================

/// Outcome of one job for one portfolio within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Owning run
    pub batch_run_id: BatchRunId,
    /// Job name
    pub job_name: String,
    /// Portfolio
    pub portfolio_id: PortfolioId,
    /// Terminal status
    pub status: JobStatus,
    /// Attempts made (0 for skipped jobs)
    pub attempts: u32,
    /// Error category for failures
    pub error_category: Option<ErrorCategory>,
    /// Human-readable detail (error message, skip reason, data-quality note)
    pub message: Option<String>,
    /// Wall-clock duration across all attempts
    pub duration_ms: u64,
    /// Rows committed by the job
    pub rows_written: usize,
    /// When the result was recorded
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::RetryWait));
        assert!(JobStatus::RetryWait.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::FailedTransientExhausted));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Skipped));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Success));
        assert!(!JobStatus::RetryWait.can_transition_to(JobStatus::Success));
        assert!(!JobStatus::FailedTransientExhausted.can_transition_to(JobStatus::Success));
        assert!(!JobStatus::Success.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&JobStatus::FailedTransientExhausted).unwrap();
        assert_eq!(json, "\"FAILED_TRANSIENT_EXHAUSTED\"");
        assert_eq!(JobStatus::RetryWait.to_string(), "RETRY_WAIT");
    }

    #[test]
    fn test_retryable_categories() {
        assert!(ErrorCategory::TransientInfra.is_retryable());
        assert!(ErrorCategory::ConcurrencyArtifact.is_retryable());
        assert!(!ErrorCategory::PermanentCalculation.is_retryable());
        assert!(!ErrorCategory::InsufficientData.is_retryable());
    }
}
