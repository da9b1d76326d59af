//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use riskline_engine::RiskEngine;
use riskline_ext_memory::MemoryStore;
use riskline_traits::config::EngineConfig;
use riskline_traits::portfolio::{Portfolio, Position, PositionType};
use riskline_traits::reference_data::FactorDefinition;
use riskline_traits::{PortfolioId, PositionId, Symbol};

/// Days of price history seeded per symbol.
pub const HISTORY_DAYS: usize = 200;

pub fn calc_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
}

pub fn alpha() -> PortfolioId {
    PortfolioId::new("ALPHA")
}

pub fn beta() -> PortfolioId {
    PortfolioId::new("BETA")
}

/// Deterministic shocks in [-1, 1).
pub fn shocks(seed: u64, n: usize) -> Vec<f64> {
    let mut state = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 33) as f64 / (1u64 << 31) as f64) * 2.0 - 1.0
        })
        .collect()
}

/// Daily closes ending on `end`, starting at 100.
pub fn closes_from_returns(returns: &[f64], end: NaiveDate) -> Vec<(NaiveDate, Decimal)> {
    let start = end - Duration::days(returns.len() as i64);
    let mut price = 100.0;
    let mut closes = vec![(start, dec!(100))];
    for (i, r) in returns.iter().enumerate() {
        price *= 1.0 + r;
        let close = Decimal::from_f64(price).unwrap().round_dp(6);
        closes.push((start + Duration::days(i as i64 + 1), close));
    }
    closes
}

/// Returns loading `loading` on the market plus idiosyncratic noise.
pub fn stock_returns(market: &[f64], loading: f64, seed: u64) -> Vec<f64> {
    shocks(seed, market.len())
        .into_iter()
        .zip(market)
        .map(|(noise, m)| loading * m + 0.003 * noise)
        .collect()
}

pub fn market_returns() -> Vec<f64> {
    shocks(1, HISTORY_DAYS).into_iter().map(|s| 0.01 * s).collect()
}

pub fn position(
    id: &str,
    portfolio: &PortfolioId,
    symbol: &str,
    position_type: PositionType,
    quantity: Decimal,
) -> Position {
    Position {
        id: PositionId::new(id),
        portfolio_id: portfolio.clone(),
        symbol: Symbol::new(symbol),
        underlying_symbol: None,
        quantity,
        position_type,
        entry_price: dec!(100),
        entry_date: calc_date() - Duration::days(300),
        last_price: None,
    }
}

pub fn portfolio(id: &PortfolioId, equity: Decimal) -> Portfolio {
    Portfolio {
        id: id.clone(),
        name: format!("{id} fund"),
        equity_balance: equity,
        current_value: None,
    }
}

/// Config with millisecond backoff so retry tests run quickly.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.batch.initial_backoff_ms = 1;
    config.batch.max_backoff_ms = 5;
    config
}

/// Two portfolios over AAPL, MSFT and XOM with SPY/TLT benchmarks and two factors.
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let end = calc_date();

    let market = market_returns();
    let rates: Vec<f64> = shocks(2, HISTORY_DAYS).into_iter().map(|s| 0.008 * s).collect();
    store.insert_prices("SPY", &closes_from_returns(&market, end));
    store.insert_prices("TLT", &closes_from_returns(&rates, end));
    store.insert_prices("AAPL", &closes_from_returns(&stock_returns(&market, 1.2, 3), end));
    store.insert_prices("MSFT", &closes_from_returns(&stock_returns(&market, 0.8, 4), end));
    store.insert_prices("XOM", &closes_from_returns(&stock_returns(&market, 0.5, 5), end));

    store.insert_portfolio(portfolio(&alpha(), dec!(50000)));
    store.insert_position(position("A1", &alpha(), "AAPL", PositionType::Long, dec!(100)));
    store.insert_position(position("A2", &alpha(), "MSFT", PositionType::Long, dec!(50)));
    store.insert_position(position("A3", &alpha(), "XOM", PositionType::Short, dec!(-200)));

    store.insert_portfolio(portfolio(&beta(), dec!(60000)));
    store.insert_position(position("B1", &beta(), "MSFT", PositionType::Long, dec!(100)));
    store.insert_position(position("B2", &beta(), "XOM", PositionType::Long, dec!(300)));

    store.insert_factor(FactorDefinition {
        id: "MARKET".into(),
        name: "Market".to_string(),
        proxy_symbol: Symbol::new("SPY"),
        active: true,
        display_order: 0,
    });
    store.insert_factor(FactorDefinition {
        id: "RATES".into(),
        name: "Rates".to_string(),
        proxy_symbol: Symbol::new("TLT"),
        active: true,
        display_order: 1,
    });

    store
}

pub fn engine(store: &Arc<MemoryStore>) -> RiskEngine {
    RiskEngine::new(store.data_sources(), test_config())
}
