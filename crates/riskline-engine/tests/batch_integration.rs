//! Integration tests for batch orchestration over the in-memory store.
//!
//! These tests run the standard job sequence end to end and check what was
//! committed, how failures are classified and how reruns behave.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal_macros::dec;

use riskline_engine::{
    AnalyticsService, BatchOrchestrator, BatchRequest, BatchService, CalculationJob,
    EngineError, EngineResult, JobOutcome, JobScope, RiskEngine, TriggerStatus,
};
use riskline_traits::portfolio::{Portfolio, PositionType};
use riskline_traits::analytics::{BenchmarkKind, BetaSubject};
use riskline_traits::batch::{BatchStatus, ErrorCategory, JobStatus};
use riskline_traits::storage::PersistenceGateway;
use riskline_traits::{Availability, BatchRunId, TraitError};

use common::*;

// =============================================================================
// FULL RUN
// =============================================================================

#[tokio::test]
async fn test_full_batch_persists_every_job() {
    let store = seeded_store();
    let engine = engine(&store);

    let summary = engine
        .run_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.total_jobs, 10);
    assert_eq!(summary.succeeded, 10);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.insufficient_data, 0);
    assert!(summary.job_durations_ms.contains_key("factor_exposures"));

    let counts = store.table_counts();
    assert_eq!(counts.snapshots, 2);
    assert_eq!(counts.correlations, 2);
    // ALPHA: 3 pairs, BETA: 1 pair
    assert_eq!(counts.pairs, 4);
    // (3 + 1) + (2 + 1) rows per benchmark
    assert_eq!(counts.regressions, 14);
    // 5 positions x 2 factors + 2 portfolios x 2 factors
    assert_eq!(counts.factor_betas, 14);
    assert_eq!(counts.batch_runs, 1);
    assert_eq!(counts.job_results, 10);

    let run = store
        .get_batch_run(&summary.batch_run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, BatchStatus::Completed);
    assert_eq!(run.succeeded, 10);
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn test_regression_bounds_and_recovered_beta() {
    let store = seeded_store();
    let engine = engine(&store);
    engine
        .run_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();

    let rows = store
        .get_regression_results(&alpha(), BenchmarkKind::Market, calc_date())
        .await
        .unwrap();
    for row in &rows {
        assert!(row.beta.abs() <= engine.config().benchmarks.beta_cap);
        assert!((0.0..=1.0).contains(&row.r_squared));
        assert!((0.0..=1.0).contains(&row.p_value));
    }

    let aapl = rows
        .iter()
        .find(|r| r.subject == BetaSubject::Position("A1".into()))
        .unwrap();
    assert!((aapl.beta - 1.2).abs() < 0.1, "AAPL beta {}", aapl.beta);

    let betas = engine
        .get_benchmark_betas(&alpha(), calc_date())
        .await
        .unwrap();
    let view = betas.into_available().unwrap();
    assert!(view.market.is_some());
    assert!(view.interest_rate.is_some());
}

// =============================================================================
// FAILURE ISOLATION
// =============================================================================

#[tokio::test]
async fn test_critical_failure_skips_only_that_portfolio() {
    let store = seeded_store();
    store.fail_positions_for(&alpha(), TraitError::DatabaseError("corrupt page".into()));
    let engine = engine(&store);

    let summary = engine
        .run_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::CompletedWithFailures);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 4);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.failed_jobs[0].job_name, "position_exposures");
    assert_eq!(summary.failed_jobs[0].status, JobStatus::FailedPermanent);

    let results = store.get_job_results(&summary.batch_run_id).await.unwrap();
    for result in results.iter().filter(|r| r.portfolio_id == alpha()) {
        if result.job_name == "position_exposures" {
            assert_eq!(result.status, JobStatus::FailedPermanent);
            assert_eq!(result.error_category, Some(ErrorCategory::PermanentCalculation));
        } else {
            assert_eq!(result.status, JobStatus::Skipped);
            assert_eq!(result.attempts, 0);
        }
    }
    for result in results.iter().filter(|r| r.portfolio_id == beta()) {
        assert_eq!(result.status, JobStatus::Success, "{}", result.job_name);
    }
}

#[tokio::test]
async fn test_transient_exhaustion_is_never_success() {
    let store = seeded_store();
    let engine = engine(&store);
    let orchestrator = engine.orchestrator();

    let prepared = orchestrator
        .prepare(BatchRequest::for_date(calc_date()).with_portfolios(vec![beta()]))
        .await
        .unwrap();
    store.fail_next_commits(3, TraitError::ConnectionFailed("reset by peer".into()));
    let summary = orchestrator.execute(prepared).await;

    let failed = &summary.failed_jobs[0];
    assert_eq!(failed.job_name, "position_exposures");
    assert_eq!(failed.status, JobStatus::FailedTransientExhausted);
    assert_eq!(failed.error_category, Some(ErrorCategory::TransientInfra));
    assert_eq!(summary.skipped, 4);

    let results = store.get_job_results(&summary.batch_run_id).await.unwrap();
    let exposures = results
        .iter()
        .find(|r| r.job_name == "position_exposures")
        .unwrap();
    assert_eq!(exposures.attempts, 3);
    assert_eq!(store.table_counts().snapshots, 0);
}

#[tokio::test]
async fn test_concurrency_artifact_retried_immediately() {
    let store = seeded_store();
    let engine = engine(&store);
    let orchestrator = engine.orchestrator();

    let prepared = orchestrator
        .prepare(BatchRequest::for_date(calc_date()).with_portfolios(vec![beta()]))
        .await
        .unwrap();
    store.fail_next_commits(1, TraitError::TransactionConflict("serialization failure".into()));
    let summary = orchestrator.execute(prepared).await;

    assert_eq!(summary.status, BatchStatus::Completed);
    let results = store.get_job_results(&summary.batch_run_id).await.unwrap();
    let exposures = results
        .iter()
        .find(|r| r.job_name == "position_exposures")
        .unwrap();
    assert_eq!(exposures.status, JobStatus::Success);
    assert_eq!(exposures.attempts, 2);
    assert_eq!(exposures.error_category, None);
}

#[tokio::test]
async fn test_concurrency_artifact_budget_exhausted() {
    let store = seeded_store();
    let engine = engine(&store);
    let orchestrator = engine.orchestrator();
    let budget = engine.config().batch.max_artifact_retries as usize;

    let prepared = orchestrator
        .prepare(BatchRequest::for_date(calc_date()).with_portfolios(vec![beta()]))
        .await
        .unwrap();
    store.fail_next_commits(budget + 1, TraitError::TransactionConflict("conflict".into()));
    let summary = orchestrator.execute(prepared).await;

    let failed = &summary.failed_jobs[0];
    assert_eq!(failed.status, JobStatus::FailedTransientExhausted);
    assert_eq!(failed.error_category, Some(ErrorCategory::ConcurrencyArtifact));
}

#[tokio::test]
async fn test_insufficient_data_succeeds_without_rows() {
    let store = seeded_store();
    let newco = riskline_traits::PortfolioId::new("NEWCO");
    store.insert_portfolio(portfolio(&newco, rust_decimal_macros::dec!(10000)));
    store.insert_position(position(
        "N1",
        &newco,
        "IPO",
        riskline_traits::portfolio::PositionType::Long,
        rust_decimal_macros::dec!(10),
    ));
    let short_history: Vec<f64> = shocks(9, 10).into_iter().map(|s| 0.02 * s).collect();
    store.insert_prices("IPO", &closes_from_returns(&short_history, calc_date()));
    let engine = engine(&store);

    let summary = engine
        .run_batch(BatchRequest::for_date(calc_date()).with_portfolios(vec![newco.clone()]))
        .await
        .unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.insufficient_data, 4);

    let results = store.get_job_results(&summary.batch_run_id).await.unwrap();
    let market = results.iter().find(|r| r.job_name == "market_beta").unwrap();
    assert_eq!(market.status, JobStatus::Success);
    assert_eq!(market.error_category, Some(ErrorCategory::InsufficientData));
    assert_eq!(market.rows_written, 0);

    assert!(store
        .get_regression_results(&newco, BenchmarkKind::Market, calc_date())
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .get_factor_betas(&newco, calc_date())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_unhealthy_gateway_is_run_fatal() {
    let store = seeded_store();
    store.set_healthy(false);
    let engine = engine(&store);

    let err = engine
        .run_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RunFatal(_)));
    assert!(engine.tracker().active().is_none());
    assert_eq!(store.table_counts().batch_runs, 0);
}

// =============================================================================
// IDEMPOTENCE AND LIFECYCLE
// =============================================================================

#[tokio::test]
async fn test_rerun_upserts_without_duplicates() {
    let store = seeded_store();
    let engine = engine(&store);

    engine
        .run_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();
    let first_counts = store.table_counts();
    let first_rows = store
        .get_regression_results(&alpha(), BenchmarkKind::Market, calc_date())
        .await
        .unwrap();
    let first_betas = store.get_factor_betas(&alpha(), calc_date()).await.unwrap();

    let err = engine
        .run_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyCompleted(_)));

    engine
        .run_batch(BatchRequest::for_date(calc_date()).forced())
        .await
        .unwrap();
    let second_counts = store.table_counts();

    assert_eq!(first_counts.regressions, second_counts.regressions);
    assert_eq!(first_counts.factor_betas, second_counts.factor_betas);
    assert_eq!(first_counts.snapshots, second_counts.snapshots);
    assert_eq!(first_counts.correlations, second_counts.correlations);
    assert_eq!(first_counts.pairs, second_counts.pairs);
    assert_eq!(second_counts.batch_runs, 2);
    assert_eq!(second_counts.job_results, 20);

    let second_rows = store
        .get_regression_results(&alpha(), BenchmarkKind::Market, calc_date())
        .await
        .unwrap();
    let second_betas = store.get_factor_betas(&alpha(), calc_date()).await.unwrap();
    assert_eq!(first_rows, second_rows);
    assert_eq!(first_betas, second_betas);
}

fn position_subjects<'a>(subjects: impl Iterator<Item = &'a BetaSubject>) -> BTreeSet<String> {
    subjects
        .filter_map(|subject| match subject {
            BetaSubject::Position(id) => Some(id.to_string()),
            BetaSubject::Portfolio => None,
        })
        .collect()
}

#[tokio::test]
async fn test_rerun_after_closing_positions_drops_their_rows() {
    let store = seeded_store();
    let engine = engine(&store);

    engine
        .run_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();
    let betas = store.get_factor_betas(&alpha(), calc_date()).await.unwrap();
    assert_eq!(
        position_subjects(betas.iter().map(|b| &b.subject)),
        BTreeSet::from(["A1".to_string(), "A2".to_string(), "A3".to_string()])
    );

    // A2 and A3 are closed before the re-run
    store.set_positions(
        &alpha(),
        vec![position("A1", &alpha(), "AAPL", PositionType::Long, dec!(100))],
    );
    engine
        .run_batch(BatchRequest::for_date(calc_date()).forced())
        .await
        .unwrap();

    let only_a1 = BTreeSet::from(["A1".to_string()]);
    let betas = store.get_factor_betas(&alpha(), calc_date()).await.unwrap();
    assert_eq!(position_subjects(betas.iter().map(|b| &b.subject)), only_a1);
    assert!(betas.iter().any(|b| b.subject == BetaSubject::Portfolio));

    let market = store
        .get_regression_results(&alpha(), BenchmarkKind::Market, calc_date())
        .await
        .unwrap();
    assert_eq!(position_subjects(market.iter().map(|r| &r.subject)), only_a1);

    // BETA is untouched
    let beta_betas = store.get_factor_betas(&beta(), calc_date()).await.unwrap();
    assert_eq!(
        position_subjects(beta_betas.iter().map(|b| &b.subject)),
        BTreeSet::from(["B1".to_string(), "B2".to_string()])
    );
}

#[tokio::test]
async fn test_trigger_status_and_progress() {
    let store = seeded_store();
    let engine = engine(&store);

    // Hold the tracker as if another run were active
    let holder = BatchRunId::generate();
    engine.tracker().try_begin(holder, calc_date(), 1).unwrap();
    let busy = engine
        .trigger_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();
    assert_eq!(busy.status, TriggerStatus::AlreadyRunning);
    assert_eq!(busy.batch_run_id, holder);
    engine.tracker().finish(&holder);

    let started = engine
        .trigger_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();
    assert_eq!(started.status, TriggerStatus::Started);
    let summary = engine.wait_for_background().await.unwrap();
    assert_eq!(summary.batch_run_id, started.batch_run_id);

    let status = engine
        .get_batch_status(&started.batch_run_id)
        .await
        .unwrap()
        .into_available()
        .unwrap();
    assert_eq!(status.status, BatchStatus::Completed);
    assert_eq!(status.jobs.len(), 10);
    assert!((status.progress_percent - 100.0).abs() < 1e-9);

    let again = engine
        .trigger_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();
    assert_eq!(again.status, TriggerStatus::AlreadyCompleted);
    assert_eq!(again.batch_run_id, started.batch_run_id);
}

#[tokio::test]
async fn test_cancel_between_portfolios() {
    let store = seeded_store();
    let engine = engine(&store);
    let orchestrator = engine.orchestrator();

    let prepared = orchestrator
        .prepare(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();
    assert_eq!(engine.cancel_batch().await.unwrap(), Some(prepared.id()));
    let summary = orchestrator.execute(prepared).await;

    assert_eq!(summary.status, BatchStatus::Cancelled);
    assert_eq!(summary.cancelled_portfolios, 2);
    assert_eq!(store.table_counts().job_results, 0);

    let run = store
        .get_batch_run(&summary.batch_run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, BatchStatus::Cancelled);
    assert!(engine.tracker().active().is_none());
}

#[tokio::test]
async fn test_unknown_batch_status_is_unavailable() {
    let store = seeded_store();
    let engine = engine(&store);
    let status = engine
        .get_batch_status(&BatchRunId::generate())
        .await
        .unwrap();
    assert!(matches!(status, Availability::Unavailable { .. }));
}

#[tokio::test]
async fn test_out_of_range_lookback_fails_job_and_releases_tracker() {
    let store = seeded_store();
    let mut config = test_config();
    config.factors.lookback_days = u32::MAX;
    let engine = RiskEngine::new(store.data_sources(), config);

    let first = engine
        .trigger_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();
    assert_eq!(first.status, TriggerStatus::Started);
    let summary = engine.wait_for_background().await.unwrap();

    assert_eq!(summary.status, BatchStatus::CompletedWithFailures);
    assert_eq!(summary.failed, 2);
    for failed in &summary.failed_jobs {
        assert_eq!(failed.job_name, "factor_exposures");
        assert_eq!(failed.error_category, Some(ErrorCategory::InputValidation));
    }
    assert!(engine.tracker().active().is_none());

    let second = engine
        .trigger_batch(BatchRequest::for_date(calc_date()).forced())
        .await
        .unwrap();
    assert_eq!(second.status, TriggerStatus::Started);
    engine.wait_for_background().await.unwrap();
}

#[tokio::test]
async fn test_dropped_prepared_run_releases_tracker() {
    let store = seeded_store();
    let engine = engine(&store);

    let prepared = engine
        .orchestrator()
        .prepare(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();
    assert_eq!(engine.tracker().active_run_id(), Some(prepared.id()));
    drop(prepared);
    assert!(engine.tracker().active().is_none());

    let again = engine
        .trigger_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();
    assert_eq!(again.status, TriggerStatus::Started);
    engine.wait_for_background().await.unwrap();
}

/// Succeeds without staging rows, so only its result row is committed.
struct NoRowsJob;

#[async_trait]
impl CalculationJob for NoRowsJob {
    fn name(&self) -> &str {
        "no_rows"
    }

    async fn run(&self, _portfolio: &Portfolio, _scope: &mut JobScope) -> EngineResult<JobOutcome> {
        Ok(JobOutcome::success(None))
    }
}

#[tokio::test]
async fn test_unrecorded_job_result_reported_on_header() {
    let store = seeded_store();
    let engine = engine(&store);
    let jobs: Vec<Arc<dyn CalculationJob>> = vec![Arc::new(NoRowsJob)];
    let orchestrator =
        BatchOrchestrator::new(engine.context().clone(), jobs, engine.tracker().clone());

    let prepared = orchestrator
        .prepare(BatchRequest::for_date(calc_date()).with_portfolios(vec![beta()]))
        .await
        .unwrap();
    store.fail_next_commits(1, TraitError::DatabaseError("disk full".into()));
    let summary = orchestrator.execute(prepared).await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.unrecorded_jobs, vec!["BETA/no_rows".to_string()]);
    assert!(store
        .get_job_results(&summary.batch_run_id)
        .await
        .unwrap()
        .is_empty());

    let status = engine
        .get_batch_status(&summary.batch_run_id)
        .await
        .unwrap()
        .into_available()
        .unwrap();
    assert!(status
        .error
        .as_deref()
        .is_some_and(|e| e.contains("BETA/no_rows")));
}
