//! Portfolio exposure cache.
//!
//! [`ExposureCache::get_exposures`] reuses the latest persisted
//! [`ExposureSnapshot`] while it is fresh enough and otherwise recomputes from
//! current positions and persists a new snapshot. Snapshots are upserted by
//! `(portfolio, date)`, so the cache needs no locking.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use riskline_traits::analytics::{ExposureSnapshot, ExposureSource};
use riskline_traits::portfolio::Position;
use riskline_traits::storage::{WriteBatch, WriteOp};
use riskline_traits::{PortfolioId, Symbol};

use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::jobs::JobScope;

/// Where a position's valuation price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    /// Latest market close on or before the valuation date
    MarketClose,
    /// The position's last observed price
    LastPrice,
    /// The position's entry price
    EntryPrice,
}

/// A position valued on a date.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionValue {
    /// The position
    pub position: Position,
    /// Unit price used
    pub price: Decimal,
    /// Where the price came from
    pub price_source: PriceSource,
    /// Signed exposure (long positive, short negative)
    pub exposure: Decimal,
}

/// Aggregated exposure totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExposureTotals {
    /// Longs minus shorts
    pub net: Decimal,
    /// Sum of absolute exposures
    pub gross: Decimal,
    /// Long side
    pub long: Decimal,
    /// Short side (negative or zero)
    pub short: Decimal,
    /// Positions considered
    pub position_count: usize,
    /// Positions priced from a market close
    pub priced_positions: usize,
}

/// Sum position values into exposure totals.
pub fn compute_exposures(values: &[PositionValue]) -> ExposureTotals {
    let mut totals = ExposureTotals {
        position_count: values.len(),
        ..ExposureTotals::default()
    };

    for value in values {
        totals.net += value.exposure;
        totals.gross += value.exposure.abs();
        if value.exposure.is_sign_negative() {
            totals.short += value.exposure;
        } else {
            totals.long += value.exposure;
        }
        if value.price_source == PriceSource::MarketClose {
            totals.priced_positions += 1;
        }
    }

    totals
}

/// Value positions with a price map, falling back to last and entry prices.
pub fn value_positions(
    positions: Vec<Position>,
    closes: &HashMap<Symbol, Decimal>,
) -> Vec<PositionValue> {
    positions
        .into_iter()
        .map(|position| {
            let (price, price_source) = match closes.get(&position.symbol) {
                Some(close) => (*close, PriceSource::MarketClose),
                None => match position.last_price {
                    Some(last) => (last, PriceSource::LastPrice),
                    None => (position.entry_price, PriceSource::EntryPrice),
                },
            };
            let exposure = position.signed_exposure(price);
            PositionValue {
                position,
                price,
                price_source,
                exposure,
            }
        })
        .collect()
}

/// Staleness-gated exposure cache.
pub struct ExposureCache {
    ctx: Arc<EngineContext>,
}

impl ExposureCache {
    /// Create a new exposure cache.
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Value the portfolio's positions open on `date`.
    pub async fn position_values(
        &self,
        portfolio_id: &PortfolioId,
        date: NaiveDate,
    ) -> EngineResult<Vec<PositionValue>> {
        let positions: Vec<Position> = self
            .ctx
            .sources
            .positions
            .get_positions(portfolio_id)
            .await?
            .into_iter()
            .filter(|p| p.is_open_on(date))
            .collect();

        if positions.is_empty() {
            return Ok(Vec::new());
        }

        let mut symbols: Vec<Symbol> = positions.iter().map(|p| p.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();

        let latest = self
            .ctx
            .sources
            .market_data
            .get_latest_prices(&symbols, date)
            .await?;
        let closes: HashMap<Symbol, Decimal> =
            latest.into_iter().map(|(s, p)| (s, p.close)).collect();

        Ok(value_positions(positions, &closes))
    }

    /// Get exposures, reusing a snapshot no older than `max_staleness_days`.
    ///
    /// On a miss the recomputed snapshot is committed before returning.
    pub async fn get_exposures(
        &self,
        portfolio_id: &PortfolioId,
        calculation_date: NaiveDate,
        max_staleness_days: i64,
    ) -> EngineResult<(ExposureSnapshot, ExposureSource)> {
        // Unknown portfolios are an error, not an empty book
        self.ctx.portfolio(portfolio_id).await?;

        let cached = self
            .ctx
            .sources
            .gateway
            .latest_exposure_snapshot(portfolio_id, calculation_date)
            .await?;

        if let Some(snapshot) = cached {
            let age = snapshot.age_days(calculation_date);
            if age <= max_staleness_days {
                debug!(
                    portfolio = %portfolio_id,
                    snapshot_date = %snapshot.calculation_date,
                    age,
                    "Exposure cache hit"
                );
                return Ok((snapshot, ExposureSource::Cache));
            }
            debug!(
                portfolio = %portfolio_id,
                age,
                max_staleness_days,
                "Exposure snapshot stale, recomputing"
            );
        }

        let snapshot = self.recompute(portfolio_id, calculation_date).await?;
        self.ctx
            .sources
            .gateway
            .commit(WriteBatch::single(WriteOp::ExposureSnapshot(snapshot.clone())))
            .await?;

        Ok((snapshot, ExposureSource::RealTime))
    }

    /// Recompute a snapshot from current positions without persisting it.
    pub async fn recompute(
        &self,
        portfolio_id: &PortfolioId,
        calculation_date: NaiveDate,
    ) -> EngineResult<ExposureSnapshot> {
        let values = self.position_values(portfolio_id, calculation_date).await?;
        let totals = compute_exposures(&values);

        Ok(ExposureSnapshot {
            portfolio_id: portfolio_id.clone(),
            calculation_date,
            net_exposure: totals.net,
            gross_exposure: totals.gross,
            long_exposure: totals.long,
            short_exposure: totals.short,
            position_count: totals.position_count,
            priced_positions: totals.priced_positions,
            created_at: Utc::now(),
        })
    }

    /// Recompute and stage a snapshot into a job scope.
    pub async fn refresh(&self, scope: &mut JobScope) -> EngineResult<ExposureSnapshot> {
        let snapshot = self
            .recompute(scope.portfolio_id(), scope.calculation_date())
            .await?;
        scope.stage(WriteOp::ExposureSnapshot(snapshot.clone()));
        Ok(snapshot)
    }
}
