//! In-process batch run tracker.
//!
//! A [`BatchRunTracker`] is created once per engine and shared by handle. It
//! holds at most one active run, the live state of every job in that run and
//! the run's cancel flag. Everything is cleared when the run finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use riskline_traits::batch::JobStatus;
use riskline_traits::{BatchRunId, PortfolioId};

/// Header of the run currently executing.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRun {
    /// Run id
    pub id: BatchRunId,
    /// Calculation date
    pub calculation_date: NaiveDate,
    /// Planned jobs
    pub total_jobs: usize,
    /// Reservation time
    pub started_at: DateTime<Utc>,
}

/// Live state of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveJobState {
    /// Portfolio
    pub portfolio_id: PortfolioId,
    /// Job name
    pub job_name: String,
    /// Current status
    pub status: JobStatus,
}

/// Progress of the active run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    /// Run id
    pub batch_run_id: BatchRunId,
    /// Planned jobs
    pub total_jobs: usize,
    /// Jobs in a terminal state
    pub finished_jobs: usize,
    /// Whether cancellation was requested
    pub cancel_requested: bool,
}

impl RunProgress {
    /// Percentage of planned jobs finished.
    pub fn percent(&self) -> f64 {
        if self.total_jobs == 0 {
            return 100.0;
        }
        (self.finished_jobs as f64 / self.total_jobs as f64 * 100.0).min(100.0)
    }
}

#[derive(Default)]
struct TrackerInner {
    active: Mutex<Option<ActiveRun>>,
    jobs: DashMap<(PortfolioId, String), JobStatus>,
    cancel: AtomicBool,
}

/// Shared handle to the active batch run.
#[derive(Clone, Default)]
pub struct BatchRunTracker {
    inner: Arc<TrackerInner>,
}

impl BatchRunTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the tracker for a run.
    ///
    /// Returns the id of the run already holding it on conflict.
    pub fn try_begin(
        &self,
        id: BatchRunId,
        calculation_date: NaiveDate,
        total_jobs: usize,
    ) -> Result<(), BatchRunId> {
        let mut active = self.inner.active.lock();
        if let Some(current) = active.as_ref() {
            return Err(current.id);
        }

        self.inner.jobs.clear();
        self.inner.cancel.store(false, Ordering::SeqCst);
        *active = Some(ActiveRun {
            id,
            calculation_date,
            total_jobs,
            started_at: Utc::now(),
        });
        Ok(())
    }

    /// Active run, if any.
    pub fn active(&self) -> Option<ActiveRun> {
        self.inner.active.lock().clone()
    }

    /// Id of the active run, if any.
    pub fn active_run_id(&self) -> Option<BatchRunId> {
        self.inner.active.lock().as_ref().map(|r| r.id)
    }

    /// Move a job to `next`. Illegal transitions are logged and ignored.
    pub fn transition(&self, portfolio_id: &PortfolioId, job_name: &str, next: JobStatus) -> bool {
        let key = (portfolio_id.clone(), job_name.to_string());
        let mut entry = self.inner.jobs.entry(key).or_insert(JobStatus::Pending);
        let current = *entry;
        if !current.can_transition_to(next) {
            warn!(
                portfolio = %portfolio_id,
                job = job_name,
                from = %current,
                to = %next,
                "Ignoring illegal job transition"
            );
            return false;
        }
        *entry = next;
        true
    }

    /// Current status of a job in the active run.
    pub fn job_status(&self, portfolio_id: &PortfolioId, job_name: &str) -> Option<JobStatus> {
        self.inner
            .jobs
            .get(&(portfolio_id.clone(), job_name.to_string()))
            .map(|s| *s)
    }

    /// Live job states, sorted by portfolio then job.
    pub fn job_states(&self) -> Vec<LiveJobState> {
        let mut states: Vec<LiveJobState> = self
            .inner
            .jobs
            .iter()
            .map(|e| LiveJobState {
                portfolio_id: e.key().0.clone(),
                job_name: e.key().1.clone(),
                status: *e.value(),
            })
            .collect();
        states.sort_by(|a, b| {
            a.portfolio_id
                .cmp(&b.portfolio_id)
                .then_with(|| a.job_name.cmp(&b.job_name))
        });
        states
    }

    /// Progress of the run with `id`, if it is the active one.
    pub fn progress(&self, id: &BatchRunId) -> Option<RunProgress> {
        let active = self.active().filter(|r| r.id == *id)?;
        let finished_jobs = self
            .inner
            .jobs
            .iter()
            .filter(|e| e.value().is_terminal())
            .count();
        Some(RunProgress {
            batch_run_id: active.id,
            total_jobs: active.total_jobs,
            finished_jobs,
            cancel_requested: self.is_cancel_requested(),
        })
    }

    /// Ask the active run to stop before its next portfolio.
    ///
    /// Returns the id of the run that will be cancelled, if any.
    pub fn request_cancel(&self) -> Option<BatchRunId> {
        let active = self.inner.active.lock();
        let id = active.as_ref()?.id;
        self.inner.cancel.store(true, Ordering::SeqCst);
        Some(id)
    }

    /// Whether cancellation was requested for the active run.
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel.load(Ordering::SeqCst)
    }

    /// Release the tracker. A stale id is ignored.
    pub fn finish(&self, id: &BatchRunId) {
        let mut active = self.inner.active.lock();
        if active.as_ref().map(|r| r.id) != Some(*id) {
            return;
        }
        *active = None;
        self.inner.jobs.clear();
        self.inner.cancel.store(false, Ordering::SeqCst);
    }
}
