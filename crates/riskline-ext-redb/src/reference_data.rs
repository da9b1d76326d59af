//! Portfolio, position, factor and price repositories.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;

use riskline_traits::market_data::{MarketDataRepository, PricePoint};
use riskline_traits::portfolio::{Portfolio, Position};
use riskline_traits::reference_data::{
    FactorDefinition, FactorDefinitionRepository, PortfolioRepository, PositionRepository,
};
use riskline_traits::{PortfolioId, Symbol, TraitError};

use crate::error::StorageResult;
use crate::keys::{self, FACTORS, PORTFOLIOS, POSITIONS, PRICES};
use crate::store::{put, remove_range, RedbStore};

impl RedbStore {
    /// Upsert a portfolio.
    pub fn save_portfolio(&self, portfolio: &Portfolio) -> StorageResult<()> {
        self.write(|txn| put(txn, PORTFOLIOS, portfolio.id.as_str(), portfolio))
    }

    /// Replace every position of `portfolio_id`.
    pub fn replace_positions(
        &self,
        portfolio_id: &PortfolioId,
        positions: &[Position],
    ) -> StorageResult<()> {
        self.write(|txn| {
            let (lower, upper) = keys::prefix_bounds(&keys::portfolio_prefix(portfolio_id));
            remove_range(txn, POSITIONS, &lower, &upper)?;
            for position in positions {
                put(txn, POSITIONS, &keys::position(portfolio_id, &position.id), position)?;
            }
            Ok(())
        })
    }

    /// Upsert a factor definition.
    pub fn save_factor(&self, factor: &FactorDefinition) -> StorageResult<()> {
        self.write(|txn| put(txn, FACTORS, factor.id.as_str(), factor))
    }

    /// Upsert daily closes by (symbol, date).
    pub fn save_prices(&self, points: &[PricePoint]) -> StorageResult<usize> {
        self.write(|txn| {
            for point in points {
                put(txn, PRICES, &keys::price(&point.symbol, point.date), point)?;
            }
            Ok(points.len())
        })
    }
}

#[async_trait]
impl PortfolioRepository for RedbStore {
    async fn get(&self, id: &PortfolioId) -> Result<Option<Portfolio>, TraitError> {
        Ok(self.fetch(PORTFOLIOS, id.as_str())?)
    }

    async fn list_active(&self) -> Result<Vec<Portfolio>, TraitError> {
        // Keys are portfolio ids, so table order is id order
        Ok(self.scan_all(PORTFOLIOS)?)
    }
}

#[async_trait]
impl PositionRepository for RedbStore {
    async fn get_positions(&self, portfolio_id: &PortfolioId) -> Result<Vec<Position>, TraitError> {
        let (lower, upper) = keys::prefix_bounds(&keys::portfolio_prefix(portfolio_id));
        let mut positions: Vec<Position> = self.scan(POSITIONS, &lower, &upper)?;
        positions.retain(|p| p.portfolio_id == *portfolio_id);
        Ok(positions)
    }
}

#[async_trait]
impl FactorDefinitionRepository for RedbStore {
    async fn list_active(&self) -> Result<Vec<FactorDefinition>, TraitError> {
        let mut factors: Vec<FactorDefinition> = self
            .scan_all::<FactorDefinition>(FACTORS)?
            .into_iter()
            .filter(|f| f.active)
            .collect();
        factors.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(factors)
    }
}

#[async_trait]
impl MarketDataRepository for RedbStore {
    async fn get_price_history(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<Symbol, Vec<PricePoint>>, TraitError> {
        let mut history = HashMap::new();
        for symbol in symbols {
            let points: Vec<PricePoint> = self.scan(
                PRICES,
                &keys::price(symbol, start),
                &keys::price(symbol, end),
            )?;
            if !points.is_empty() {
                history.insert(symbol.clone(), points);
            }
        }
        Ok(history)
    }

    async fn get_latest_prices(
        &self,
        symbols: &[Symbol],
        as_of: NaiveDate,
    ) -> Result<HashMap<Symbol, PricePoint>, TraitError> {
        let mut latest = HashMap::new();
        for symbol in symbols {
            let (lower, upper) = keys::through_date(&keys::symbol_prefix(symbol), as_of);
            if let Some(point) = self.last_in::<PricePoint>(PRICES, &lower, &upper)? {
                latest.insert(symbol.clone(), point);
            }
        }
        Ok(latest)
    }
}
