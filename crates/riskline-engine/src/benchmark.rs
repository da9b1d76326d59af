//! Market and interest-rate betas.
//!
//! Each position is regressed on the configured benchmark proxy. The
//! portfolio-level beta regresses an exposure-weighted portfolio return
//! series on the same proxy, so the persisted portfolio row carries its own
//! fit statistics rather than an average of position fits.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use riskline_math::stats::{align_returns, ReturnSeries};
use riskline_traits::analytics::{BenchmarkKind, BetaSubject, RegressionResult};
use riskline_traits::portfolio::Portfolio;
use riskline_traits::storage::WriteOp;
use riskline_traits::{Availability, PortfolioId, PositionId, Symbol, UnavailableReason};

use crate::cache::{ExposureCache, PositionValue};
use crate::context::{window_start, EngineContext};
use crate::error::{EngineError, EngineResult};
use crate::jobs::JobScope;

/// Result of a benchmark beta calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkBetaRun {
    /// Benchmark
    pub kind: BenchmarkKind,
    /// Portfolio-level regression, if it could be estimated
    pub portfolio: Option<RegressionResult>,
    /// Position-level rows staged
    pub position_rows: usize,
    /// Positions skipped, with reasons
    pub skipped: Vec<(PositionId, String)>,
}

impl BenchmarkBetaRun {
    /// Data-quality note for the job result.
    pub fn detail(&self) -> Option<String> {
        let mut notes = Vec::new();
        if !self.skipped.is_empty() {
            notes.push(format!("{} positions skipped", self.skipped.len()));
        }
        if self.portfolio.is_none() {
            notes.push("portfolio beta not estimated".to_string());
        }
        (!notes.is_empty()).then(|| notes.join("; "))
    }
}

/// Portfolio betas read payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkBetasView {
    /// Calculation date
    pub calculation_date: NaiveDate,
    /// Market beta row
    pub market: Option<RegressionResult>,
    /// Interest-rate beta row
    pub interest_rate: Option<RegressionResult>,
}

/// Exposure-weighted portfolio returns on each date where at least one
/// position has a return.
pub fn portfolio_returns(
    weighted: &[(Decimal, &ReturnSeries)],
    denominator: Decimal,
) -> ReturnSeries {
    let mut combined: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    let denominator = denominator.to_f64().unwrap_or(0.0);
    if denominator == 0.0 {
        return combined;
    }

    for (exposure, series) in weighted {
        let w = exposure.to_f64().unwrap_or(0.0) / denominator;
        for (date, r) in series.iter() {
            *combined.entry(*date).or_insert(0.0) += w * r;
        }
    }
    combined
}

/// Market and interest-rate beta engine.
pub struct BenchmarkBetaEngine {
    ctx: Arc<EngineContext>,
    cache: Arc<ExposureCache>,
}

impl BenchmarkBetaEngine {
    /// Create a new benchmark beta engine.
    pub fn new(ctx: Arc<EngineContext>, cache: Arc<ExposureCache>) -> Self {
        Self { ctx, cache }
    }

    /// Proxy symbol for a benchmark.
    pub fn proxy(&self, kind: BenchmarkKind) -> &Symbol {
        match kind {
            BenchmarkKind::Market => &self.ctx.config.benchmarks.market_proxy,
            BenchmarkKind::InterestRate => &self.ctx.config.benchmarks.rate_proxy,
        }
    }

    /// Compute and stage position and portfolio betas against a benchmark.
    pub async fn calculate_betas(
        &self,
        portfolio: &Portfolio,
        kind: BenchmarkKind,
        scope: &mut JobScope,
    ) -> EngineResult<BenchmarkBetaRun> {
        let config = &self.ctx.config;
        let date = scope.calculation_date();
        let proxy = self.proxy(kind).clone();

        let values = self.cache.position_values(&portfolio.id, date).await?;
        if values.is_empty() {
            return Err(EngineError::InsufficientData("portfolio has no open positions".into()));
        }

        let mut symbols: Vec<Symbol> = values
            .iter()
            .map(|v| v.position.return_symbol().clone())
            .chain(std::iter::once(proxy.clone()))
            .collect();
        symbols.sort();
        symbols.dedup();

        let series = self
            .ctx
            .return_series(&symbols, window_start(date, config.benchmarks.lookback_days)?, date)
            .await?;
        let Some(proxy_returns) = series.get(&proxy) else {
            return Err(EngineError::InsufficientData(format!(
                "no return data for {} proxy {proxy}",
                kind.as_str()
            )));
        };

        let mut rows = Vec::new();
        let mut skipped = Vec::new();
        let mut weighted: Vec<(Decimal, &ReturnSeries)> = Vec::new();

        for PositionValue {
            position, exposure, ..
        } in &values
        {
            let symbol = position.return_symbol();
            let Some(returns) = series.get(symbol) else {
                skipped.push((position.id.clone(), format!("no return data for {symbol}")));
                continue;
            };
            weighted.push((*exposure, returns));

            let (y, x) = align_returns(returns, proxy_returns);
            match self.ctx.regression.run_single_factor_regression(
                &y,
                &x,
                config.benchmarks.beta_cap,
                config.regression.confidence,
            ) {
                Ok(fit) => rows.push(RegressionResult::from_regression(
                    portfolio.id.clone(),
                    BetaSubject::Position(position.id.clone()),
                    kind,
                    date,
                    &fit,
                )),
                Err(err) => skipped.push((position.id.clone(), err.to_string())),
            }
        }

        for (position_id, reason) in &skipped {
            warn!(
                portfolio = %portfolio.id,
                position = %position_id,
                benchmark = kind.as_str(),
                reason = %reason,
                "Skipping position for benchmark regression"
            );
        }

        let gross: Decimal = weighted.iter().map(|(e, _)| e.abs()).sum();
        let denominator = if portfolio.equity_balance > Decimal::ZERO {
            portfolio.equity_balance
        } else {
            gross
        };
        let combined = portfolio_returns(&weighted, denominator);
        let (y, x) = align_returns(&combined, proxy_returns);

        let portfolio_row = match self.ctx.regression.run_single_factor_regression(
            &y,
            &x,
            config.benchmarks.beta_cap,
            config.regression.confidence,
        ) {
            Ok(fit) => Some(RegressionResult::from_regression(
                portfolio.id.clone(),
                BetaSubject::Portfolio,
                kind,
                date,
                &fit,
            )),
            Err(err) if rows.is_empty() => return Err(err.into()),
            Err(err) => {
                warn!(
                    portfolio = %portfolio.id,
                    benchmark = kind.as_str(),
                    error = %err,
                    "Portfolio beta not estimated"
                );
                None
            }
        };

        debug!(
            portfolio = %portfolio.id,
            benchmark = kind.as_str(),
            positions = rows.len(),
            beta = ?portfolio_row.as_ref().map(|r| r.beta),
            "Benchmark betas calculated"
        );

        let position_rows = rows.len();
        let mut staged = rows;
        staged.extend(portfolio_row.iter().cloned());
        scope.stage(WriteOp::Regressions {
            portfolio_id: portfolio.id.clone(),
            benchmark: kind,
            calculation_date: date,
            rows: staged,
        });

        Ok(BenchmarkBetaRun {
            kind,
            portfolio: portfolio_row,
            position_rows,
            skipped,
        })
    }

    /// Portfolio-level market and rate betas for a calculation date.
    pub async fn get_portfolio_betas(
        &self,
        portfolio_id: &PortfolioId,
        calculation_date: NaiveDate,
    ) -> EngineResult<Availability<BenchmarkBetasView>> {
        self.ctx.portfolio(portfolio_id).await?;
        let gateway = &self.ctx.sources.gateway;

        let mut view = BenchmarkBetasView {
            calculation_date,
            market: None,
            interest_rate: None,
        };
        for kind in [BenchmarkKind::Market, BenchmarkKind::InterestRate] {
            let row = gateway
                .get_regression_results(portfolio_id, kind, calculation_date)
                .await?
                .into_iter()
                .find(|r| r.subject == BetaSubject::Portfolio);
            match kind {
                BenchmarkKind::Market => view.market = row,
                BenchmarkKind::InterestRate => view.interest_rate = row,
            }
        }

        if view.market.is_none() && view.interest_rate.is_none() {
            return Ok(Availability::unavailable(
                UnavailableReason::NoCalculationAvailable,
            ));
        }
        Ok(Availability::Available(view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_portfolio_returns_weighting() {
        let d1 = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 6, 4).unwrap();
        let a: ReturnSeries = [(d1, 0.02), (d2, -0.01)].into_iter().collect();
        let b: ReturnSeries = [(d2, 0.04)].into_iter().collect();

        // Long 600 of A, short 400 of B on a 1000 book
        let combined = portfolio_returns(&[(dec!(600), &a), (dec!(-400), &b)], dec!(1000));
        approx::assert_relative_eq!(combined[&d1], 0.012, epsilon = 1e-12);
        approx::assert_relative_eq!(combined[&d2], -0.006 - 0.016, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_denominator_yields_empty_series() {
        let a: ReturnSeries = ReturnSeries::new();
        assert!(portfolio_returns(&[(dec!(1), &a)], Decimal::ZERO).is_empty());
    }
}
