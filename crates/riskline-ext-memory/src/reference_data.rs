//! Portfolio, position and factor repositories.

use async_trait::async_trait;

use riskline_traits::portfolio::{Portfolio, Position};
use riskline_traits::reference_data::{
    FactorDefinition, FactorDefinitionRepository, PortfolioRepository, PositionRepository,
};
use riskline_traits::{PortfolioId, TraitError};

use crate::MemoryStore;

impl MemoryStore {
    /// Insert or replace a portfolio.
    pub fn insert_portfolio(&self, portfolio: Portfolio) {
        self.portfolios
            .write()
            .insert(portfolio.id.clone(), portfolio);
    }

    /// Add a position to its portfolio, replacing one with the same id.
    pub fn insert_position(&self, position: Position) {
        let mut positions = self.positions.write();
        let book = positions.entry(position.portfolio_id.clone()).or_default();
        book.retain(|p| p.id != position.id);
        book.push(position);
    }

    /// Replace every position of a portfolio.
    pub fn set_positions(&self, portfolio_id: &PortfolioId, positions: Vec<Position>) {
        self.positions
            .write()
            .insert(portfolio_id.clone(), positions);
    }

    /// Insert or replace a factor definition.
    pub fn insert_factor(&self, factor: FactorDefinition) {
        let mut factors = self.factors.write();
        factors.retain(|f| f.id != factor.id);
        factors.push(factor);
    }
}

#[async_trait]
impl PortfolioRepository for MemoryStore {
    async fn get(&self, id: &PortfolioId) -> Result<Option<Portfolio>, TraitError> {
        Ok(self.portfolios.read().get(id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Portfolio>, TraitError> {
        Ok(self.portfolios.read().values().cloned().collect())
    }
}

#[async_trait]
impl PositionRepository for MemoryStore {
    async fn get_positions(&self, portfolio_id: &PortfolioId) -> Result<Vec<Position>, TraitError> {
        if let Some(err) = self.position_failures.read().get(portfolio_id) {
            return Err(err.clone());
        }
        Ok(self
            .positions
            .read()
            .get(portfolio_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl FactorDefinitionRepository for MemoryStore {
    async fn list_active(&self) -> Result<Vec<FactorDefinition>, TraitError> {
        let mut factors: Vec<FactorDefinition> = self
            .factors
            .read()
            .iter()
            .filter(|f| f.active)
            .cloned()
            .collect();
        factors.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(factors)
    }
}
