//! Runs a batch against a redb file, reopens it and reads the results back.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use riskline_engine::{AnalyticsService, BatchRequest, BatchService, CorrelationQuery, RiskEngine};
use riskline_ext_redb::{FixtureFile, RedbStore};
use riskline_traits::analytics::ExposureSource;
use riskline_traits::batch::BatchStatus;
use riskline_traits::config::EngineConfig;
use riskline_traits::market_data::PricePoint;
use riskline_traits::portfolio::{Portfolio, Position, PositionType};
use riskline_traits::reference_data::FactorDefinition;
use riskline_traits::{PortfolioId, PositionId, Symbol};

const DAYS: i64 = 160;

fn calc_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
}

fn series(symbol: &str, returns: impl Fn(f64) -> f64) -> Vec<PricePoint> {
    let start = calc_date() - Duration::days(DAYS);
    let mut price = 100.0;
    (0..=DAYS)
        .map(|i| {
            if i > 0 {
                price *= 1.0 + returns(i as f64);
            }
            PricePoint {
                symbol: Symbol::new(symbol),
                date: start + Duration::days(i),
                close: Decimal::from_f64(price).unwrap().round_dp(4),
            }
        })
        .collect()
}

fn market(t: f64) -> f64 {
    0.01 * (t * 0.7).sin() + 0.004 * (t * 1.3).cos()
}

fn fixture() -> FixtureFile {
    let pf = PortfolioId::new("ALPHA");
    let position = |id: &str, symbol: &str, qty: Decimal, kind| Position {
        id: PositionId::new(id),
        portfolio_id: pf.clone(),
        symbol: Symbol::new(symbol),
        underlying_symbol: None,
        quantity: qty,
        position_type: kind,
        entry_price: dec!(100),
        entry_date: calc_date() - Duration::days(200),
        last_price: None,
    };

    let mut prices = series("SPY", market);
    prices.extend(series("TLT", |t| 0.006 * (t * 0.45).cos()));
    prices.extend(series("AAPL", |t| 1.1 * market(t) + 0.002 * (t * 2.9).sin()));
    prices.extend(series("MSFT", |t| 0.7 * market(t) + 0.003 * (t * 1.7).cos()));

    FixtureFile {
        portfolios: vec![Portfolio {
            id: pf.clone(),
            name: "Alpha".to_string(),
            equity_balance: dec!(40000),
            current_value: None,
        }],
        positions: vec![
            position("A1", "AAPL", dec!(100), PositionType::Long),
            position("A2", "MSFT", dec!(-80), PositionType::Short),
        ],
        factors: vec![FactorDefinition {
            id: "MARKET".into(),
            name: "Market".to_string(),
            proxy_symbol: Symbol::new("SPY"),
            active: true,
            display_order: 0,
        }],
        prices,
    }
}

#[tokio::test]
async fn test_batch_results_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("riskline.redb");
    let pf = PortfolioId::new("ALPHA");

    let batch_run_id = {
        let store = Arc::new(RedbStore::open(&path).unwrap());
        store.load_fixture(&fixture()).unwrap();
        let engine = RiskEngine::new(store.data_sources(), EngineConfig::default());

        let summary = engine
            .run_batch(BatchRequest::for_date(calc_date()))
            .await
            .unwrap();
        assert_eq!(summary.status, BatchStatus::Completed);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.total_jobs, summary.succeeded);
        summary.batch_run_id
    };

    let store = Arc::new(RedbStore::open(&path).unwrap());
    let counts = store.table_counts().unwrap();
    assert_eq!(counts["exposure_snapshots"], 1);
    assert_eq!(counts["correlations"], 1);
    assert_eq!(counts["correlation_pairs"], 1);
    assert_eq!(counts["batch_runs"], 1);
    assert_eq!(counts["job_results"] as usize, 5);

    let engine = RiskEngine::new(store.data_sources(), EngineConfig::default());

    let exposures = engine
        .get_portfolio_exposures(&pf, calc_date())
        .await
        .unwrap()
        .into_available()
        .unwrap();
    assert_eq!(exposures.source, ExposureSource::Cache);
    assert_eq!(exposures.snapshot.position_count, 2);
    assert!(exposures.snapshot.short_exposure < Decimal::ZERO);

    let factors = engine
        .get_factor_exposures(&pf, calc_date())
        .await
        .unwrap()
        .into_available()
        .unwrap();
    assert_eq!(factors.factors.len(), 1);

    let score = engine
        .get_diversification_score(&pf, calc_date(), CorrelationQuery::default())
        .await
        .unwrap()
        .into_available()
        .unwrap();
    assert!(score.score > 0.5);

    let status = engine
        .get_batch_status(&batch_run_id)
        .await
        .unwrap()
        .into_available()
        .unwrap();
    assert_eq!(status.status, BatchStatus::Completed);
    assert_eq!(status.jobs.len(), 5);
    assert!((status.progress_percent - 100.0).abs() < 1e-9);

    // Already completed for the date unless forced
    let again = engine
        .trigger_batch(BatchRequest::for_date(calc_date()))
        .await
        .unwrap();
    assert_eq!(again.batch_run_id, batch_run_id);
}
