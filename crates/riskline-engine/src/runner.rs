//! Job execution with retry, timeout and commit-on-success.
//!
//! ## Retry classification
//!
//! | Category | Path |
//! |---|---|
//! | `TransientInfra` | exponential backoff with jitter, up to `max_attempts` |
//! | `ConcurrencyArtifact` | immediate retry, up to `max_artifact_retries` |
//! | `InsufficientData` | terminal `Success`, nothing committed |
//! | anything else | terminal `FailedPermanent` |
//!
//! Every attempt runs against a fresh [`JobScope`]. The scope is committed only
//! when the attempt succeeds, so a failed attempt never leaves partial rows.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use futures::FutureExt;
use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use riskline_traits::batch::{ErrorCategory, JobResult, JobStatus};
use riskline_traits::config::BatchConfig;
use riskline_traits::portfolio::Portfolio;
use riskline_traits::storage::PersistenceGateway;
use riskline_traits::{BatchRunId, PortfolioId};

use crate::error::EngineError;
use crate::jobs::{CalculationJob, JobOutcome, JobScope};
use crate::tracker::BatchRunTracker;

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Retry, backoff and timeout settings for the job runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts for transient failures, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Backoff growth factor
    pub backoff_multiplier: f64,
    /// Relative jitter applied to each delay (0.2 = +/-20%)
    pub jitter_factor: f64,
    /// Immediate retries for rejected concurrent commits
    pub max_artifact_retries: u32,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

impl From<&BatchConfig> for RetryPolicy {
    fn from(config: &BatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: 0.2,
            max_artifact_retries: config.max_artifact_retries,
            timeout: config.job_timeout(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1 for the first retry).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis() as f64
            * self
                .backoff_multiplier
                .powi(retry.saturating_sub(1) as i32);
        let capped_ms = base_ms.min(self.max_backoff.as_millis() as f64);

        let jittered_ms = if self.jitter_factor > 0.0 && capped_ms > 0.0 {
            let range = capped_ms * self.jitter_factor;
            let min = (capped_ms - range).max(0.0);
            let max = capped_ms + range;
            rand::rng().random_range(min..=max)
        } else {
            capped_ms
        };

        Duration::from_millis(jittered_ms.min(self.max_backoff.as_millis() as f64) as u64)
    }
}

// =============================================================================
// EXECUTION RECORD
// =============================================================================

/// Terminal record of one job for one portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct JobExecution {
    /// Job name
    pub job_name: String,
    /// Portfolio
    pub portfolio_id: PortfolioId,
    /// Terminal status
    pub status: JobStatus,
    /// Attempts made
    pub attempts: u32,
    /// Error category, including `InsufficientData` on a data-limited success
    pub error_category: Option<ErrorCategory>,
    /// Detail or error message
    pub message: Option<String>,
    /// Wall-clock time across all attempts
    pub duration: Duration,
    /// Rows committed
    pub rows_written: usize,
}

impl JobExecution {
    /// A job that was not run.
    pub fn skipped(job_name: &str, portfolio_id: PortfolioId, reason: impl Into<String>) -> Self {
        Self {
            job_name: job_name.to_string(),
            portfolio_id,
            status: JobStatus::Skipped,
            attempts: 0,
            error_category: None,
            message: Some(reason.into()),
            duration: Duration::ZERO,
            rows_written: 0,
        }
    }

    /// True if the job finished without a result because data was short.
    pub fn is_insufficient_data(&self) -> bool {
        self.status == JobStatus::Success
            && self.error_category == Some(ErrorCategory::InsufficientData)
    }

    /// Persistable result row for a run.
    pub fn to_result(&self, batch_run_id: BatchRunId) -> JobResult {
        JobResult {
            batch_run_id,
            job_name: self.job_name.clone(),
            portfolio_id: self.portfolio_id.clone(),
            status: self.status,
            attempts: self.attempts,
            error_category: self.error_category,
            message: self.message.clone(),
            duration_ms: self.duration.as_millis() as u64,
            rows_written: self.rows_written,
            recorded_at: Utc::now(),
        }
    }
}

/// What a single attempt produced once its scope has been handled.
enum AttemptResult {
    Committed { rows: usize, detail: Option<String> },
    NoResult { category: Option<ErrorCategory>, message: String },
    Failed { category: ErrorCategory, message: String },
}

// =============================================================================
// RUNNER
// =============================================================================

/// Runs a job to a terminal state.
pub struct JobRunner {
    gateway: Arc<dyn PersistenceGateway>,
    policy: RetryPolicy,
}

impl JobRunner {
    /// Create a runner committing through `gateway`.
    pub fn new(gateway: Arc<dyn PersistenceGateway>, policy: RetryPolicy) -> Self {
        Self { gateway, policy }
    }

    /// Active retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `job` for `portfolio`, reporting state transitions to `tracker`.
    pub async fn run(
        &self,
        job: &dyn CalculationJob,
        portfolio: &Portfolio,
        calculation_date: NaiveDate,
        tracker: &BatchRunTracker,
    ) -> JobExecution {
        let job_name = job.name().to_string();
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut transient_failures = 0u32;
        let mut artifact_retries = 0u32;

        tracker.transition(&portfolio.id, &job_name, JobStatus::Running);

        let (status, error_category, message, rows_written) = loop {
            attempts += 1;
            debug!(
                portfolio = %portfolio.id,
                job = %job_name,
                attempt = attempts,
                "Starting job attempt"
            );

            let result = self.attempt(job, portfolio, calculation_date).await;
            let (category, message) = match result {
                AttemptResult::Committed { rows, detail } => {
                    break (JobStatus::Success, None, detail, rows);
                }
                AttemptResult::NoResult { category, message } => {
                    break (JobStatus::Success, category, Some(message), 0);
                }
                AttemptResult::Failed { category, message } => (category, message),
            };

            let retry_delay = match category {
                ErrorCategory::ConcurrencyArtifact
                    if artifact_retries < self.policy.max_artifact_retries =>
                {
                    artifact_retries += 1;
                    Some(Duration::ZERO)
                }
                ErrorCategory::TransientInfra
                    if transient_failures + 1 < self.policy.max_attempts =>
                {
                    transient_failures += 1;
                    Some(self.policy.delay_for_attempt(transient_failures))
                }
                ErrorCategory::TransientInfra => {
                    transient_failures += 1;
                    None
                }
                _ => None,
            };

            match retry_delay {
                Some(delay) => {
                    warn!(
                        portfolio = %portfolio.id,
                        job = %job_name,
                        attempt = attempts,
                        category = ?category,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Job attempt failed, retrying"
                    );
                    tracker.transition(&portfolio.id, &job_name, JobStatus::RetryWait);
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    tracker.transition(&portfolio.id, &job_name, JobStatus::Running);
                }
                None => {
                    let status = if category.is_retryable() {
                        JobStatus::FailedTransientExhausted
                    } else {
                        JobStatus::FailedPermanent
                    };
                    error!(
                        portfolio = %portfolio.id,
                        job = %job_name,
                        attempts,
                        transient_failures,
                        artifact_retries,
                        category = ?category,
                        status = %status,
                        error = %message,
                        "Job failed"
                    );
                    break (status, Some(category), Some(message), 0);
                }
            }
        };

        tracker.transition(&portfolio.id, &job_name, status);

        let execution = JobExecution {
            job_name,
            portfolio_id: portfolio.id.clone(),
            status,
            attempts,
            error_category,
            message,
            duration: started.elapsed(),
            rows_written,
        };

        debug!(
            portfolio = %execution.portfolio_id,
            job = %execution.job_name,
            status = %execution.status,
            attempts = execution.attempts,
            rows = execution.rows_written,
            duration_ms = execution.duration.as_millis() as u64,
            "Job finished"
        );

        execution
    }

    /// One attempt in a fresh scope, committing on success.
    async fn attempt(
        &self,
        job: &dyn CalculationJob,
        portfolio: &Portfolio,
        calculation_date: NaiveDate,
    ) -> AttemptResult {
        let mut scope = JobScope::new(portfolio.id.clone(), calculation_date);

        let run = AssertUnwindSafe(job.run(portfolio, &mut scope)).catch_unwind();
        let outcome = match timeout(self.policy.timeout, run).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => Err(EngineError::PermanentCalculation(format!(
                "job panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(EngineError::TransientInfra(format!(
                "attempt timed out after {}s",
                self.policy.timeout.as_secs_f64()
            ))),
        };

        match outcome {
            Ok(JobOutcome::Success { detail, .. }) => {
                let rows = scope.staged_rows();
                if scope.is_empty() {
                    return AttemptResult::Committed { rows: 0, detail };
                }
                match self.gateway.commit(scope.into_batch()).await {
                    Ok(()) => AttemptResult::Committed { rows, detail },
                    Err(e) => {
                        let err = EngineError::from(e);
                        AttemptResult::Failed {
                            category: err.category(),
                            message: err.to_string(),
                        }
                    }
                }
            }
            Ok(JobOutcome::InsufficientData { reason }) => AttemptResult::NoResult {
                category: Some(ErrorCategory::InsufficientData),
                message: reason,
            },
            Ok(JobOutcome::Skipped { reason }) => AttemptResult::NoResult {
                category: None,
                message: reason,
            },
            Ok(JobOutcome::Error { category, message }) => {
                if category == ErrorCategory::InsufficientData {
                    AttemptResult::NoResult {
                        category: Some(category),
                        message,
                    }
                } else {
                    AttemptResult::Failed { category, message }
                }
            }
            Err(EngineError::InsufficientData(reason)) => AttemptResult::NoResult {
                category: Some(ErrorCategory::InsufficientData),
                message: reason,
            },
            Err(err) => AttemptResult::Failed {
                category: err.category(),
                message: err.to_string(),
            },
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(60),
            jitter_factor: 0.2,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let ms = policy.delay_for_attempt(1).as_millis();
            assert!((800..=1200).contains(&ms), "delay {ms}ms outside band");
        }
    }

    #[test]
    fn test_policy_from_config() {
        let config = BatchConfig {
            max_attempts: 0,
            job_timeout_secs: 7,
            ..BatchConfig::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("index out of bounds");
        assert_eq!(panic_message(payload.as_ref()), "index out of bounds");
        let payload: Box<dyn Any + Send> = Box::new(String::from("overflow"));
        assert_eq!(panic_message(payload.as_ref()), "overflow");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_skipped_execution_has_no_attempts() {
        let exec = JobExecution::skipped("market_beta", PortfolioId::new("PF"), "critical failed");
        assert_eq!(exec.attempts, 0);
        assert_eq!(exec.status, JobStatus::Skipped);
        let row = exec.to_result(BatchRunId::generate());
        assert_eq!(row.message.as_deref(), Some("critical failed"));
    }
}
