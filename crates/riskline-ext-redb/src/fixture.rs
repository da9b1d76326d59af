//! JSON fixture files for seeding reference and market data.
//!
//! ```json
//! {
//!   "portfolios": [{"id": "ALPHA", "name": "Alpha", "equity_balance": 50000, "current_value": null}],
//!   "positions": [{"id": "A1", "portfolio_id": "ALPHA", "symbol": "AAPL", "quantity": 100,
//!                  "position_type": "long", "entry_price": 150, "entry_date": "2024-01-02"}],
//!   "factors": [{"id": "MARKET", "name": "Market", "proxy_symbol": "SPY", "active": true}],
//!   "prices": [{"symbol": "AAPL", "date": "2024-06-28", "close": 210.5}]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use riskline_traits::market_data::PricePoint;
use riskline_traits::portfolio::{Portfolio, Position};
use riskline_traits::reference_data::FactorDefinition;
use riskline_traits::PortfolioId;

use crate::error::{StorageError, StorageResult};
use crate::keys::{self, FACTORS, PORTFOLIOS, POSITIONS, PRICES};
use crate::store::{put, remove_range, RedbStore};

/// Reference and market data to load into a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureFile {
    /// Portfolios
    #[serde(default)]
    pub portfolios: Vec<Portfolio>,
    /// Positions; each portfolio's set replaces what is stored
    #[serde(default)]
    pub positions: Vec<Position>,
    /// Factor definitions
    #[serde(default)]
    pub factors: Vec<FactorDefinition>,
    /// Daily closes
    #[serde(default)]
    pub prices: Vec<PricePoint>,
}

/// Rows written by a fixture load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Portfolios upserted
    pub portfolios: usize,
    /// Positions written
    pub positions: usize,
    /// Factors upserted
    pub factors: usize,
    /// Price observations upserted
    pub prices: usize,
}

impl FixtureFile {
    /// Read and parse a fixture from disk.
    pub fn from_path(path: impl AsRef<Path>) -> StorageResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse a fixture from a JSON string.
    pub fn from_json(json: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check internal consistency.
    ///
    /// Positions must belong to a portfolio in the file or `known`, position
    /// ids must be unique per portfolio, and closes must be positive.
    pub fn validate(&self, known: &BTreeSet<PortfolioId>) -> StorageResult<()> {
        let declared: BTreeSet<&PortfolioId> = self.portfolios.iter().map(|p| &p.id).collect();

        let mut seen = BTreeSet::new();
        for position in &self.positions {
            if !declared.contains(&position.portfolio_id) && !known.contains(&position.portfolio_id)
            {
                return Err(StorageError::InvalidFixture(format!(
                    "position {} references unknown portfolio {}",
                    position.id, position.portfolio_id
                )));
            }
            if !seen.insert((&position.portfolio_id, &position.id)) {
                return Err(StorageError::InvalidFixture(format!(
                    "duplicate position {} in portfolio {}",
                    position.id, position.portfolio_id
                )));
            }
        }

        if let Some(bad) = self.prices.iter().find(|p| p.close <= Decimal::ZERO) {
            return Err(StorageError::InvalidFixture(format!(
                "non-positive close {} for {} on {}",
                bad.close, bad.symbol, bad.date
            )));
        }
        Ok(())
    }

    fn positions_by_portfolio(&self) -> BTreeMap<&PortfolioId, Vec<&Position>> {
        let mut grouped: BTreeMap<&PortfolioId, Vec<&Position>> = BTreeMap::new();
        for position in &self.positions {
            grouped.entry(&position.portfolio_id).or_default().push(position);
        }
        grouped
    }
}

impl RedbStore {
    /// Validate and load a fixture in one transaction.
    pub fn load_fixture(&self, fixture: &FixtureFile) -> StorageResult<LoadSummary> {
        let known: BTreeSet<PortfolioId> = self
            .scan_all::<Portfolio>(PORTFOLIOS)?
            .into_iter()
            .map(|p| p.id)
            .collect();
        fixture.validate(&known)?;

        let summary = self.write(|txn| {
            for portfolio in &fixture.portfolios {
                put(txn, PORTFOLIOS, portfolio.id.as_str(), portfolio)?;
            }
            for (portfolio_id, positions) in fixture.positions_by_portfolio() {
                let (lower, upper) = keys::prefix_bounds(&keys::portfolio_prefix(portfolio_id));
                remove_range(txn, POSITIONS, &lower, &upper)?;
                for position in positions {
                    put(txn, POSITIONS, &keys::position(portfolio_id, &position.id), position)?;
                }
            }
            for factor in &fixture.factors {
                put(txn, FACTORS, factor.id.as_str(), factor)?;
            }
            for point in &fixture.prices {
                put(txn, PRICES, &keys::price(&point.symbol, point.date), point)?;
            }
            Ok(LoadSummary {
                portfolios: fixture.portfolios.len(),
                positions: fixture.positions.len(),
                factors: fixture.factors.len(),
                prices: fixture.prices.len(),
            })
        })?;

        info!(
            portfolios = summary.portfolios,
            positions = summary.positions,
            factors = summary.factors,
            prices = summary.prices,
            "Loaded fixture"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_store;
    use riskline_traits::reference_data::PositionRepository;

    const FIXTURE: &str = r#"{
        "portfolios": [
            {"id": "ALPHA", "name": "Alpha", "equity_balance": 50000, "current_value": null}
        ],
        "positions": [
            {"id": "A1", "portfolio_id": "ALPHA", "symbol": "AAPL", "quantity": 100,
             "position_type": "long", "entry_price": 150, "entry_date": "2024-01-02"},
            {"id": "A2", "portfolio_id": "ALPHA", "symbol": "XOM", "quantity": -50,
             "position_type": "short", "entry_price": 110, "entry_date": "2024-01-02"}
        ],
        "factors": [
            {"id": "MARKET", "name": "Market", "proxy_symbol": "SPY", "active": true}
        ],
        "prices": [
            {"symbol": "AAPL", "date": "2024-06-27", "close": 209.1},
            {"symbol": "AAPL", "date": "2024-06-28", "close": 210.5}
        ]
    }"#;

    #[tokio::test]
    async fn test_load_fixture() {
        let (_dir, store) = temp_store();
        let fixture = FixtureFile::from_json(FIXTURE).unwrap();
        let summary = store.load_fixture(&fixture).unwrap();
        assert_eq!(
            summary,
            LoadSummary {
                portfolios: 1,
                positions: 2,
                factors: 1,
                prices: 2
            }
        );

        let positions = store.get_positions(&PortfolioId::new("ALPHA")).await.unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(fixture.factors[0].display_order, 0);
    }

    #[test]
    fn test_orphan_position_rejected() {
        let (_dir, store) = temp_store();
        let mut fixture = FixtureFile::from_json(FIXTURE).unwrap();
        fixture.portfolios.clear();

        let err = store.load_fixture(&fixture).unwrap_err();
        assert!(matches!(err, StorageError::InvalidFixture(_)));
        assert_eq!(store.table_counts().unwrap()["prices"], 0);
    }

    #[test]
    fn test_positions_for_stored_portfolio_accepted() {
        let (_dir, store) = temp_store();
        let fixture = FixtureFile::from_json(FIXTURE).unwrap();
        store.load_fixture(&fixture).unwrap();

        let positions_only = FixtureFile {
            positions: fixture.positions.clone(),
            ..FixtureFile::default()
        };
        assert!(store.load_fixture(&positions_only).is_ok());
    }

    #[test]
    fn test_non_positive_close_rejected() {
        let mut fixture = FixtureFile::from_json(FIXTURE).unwrap();
        fixture.prices[0].close = Decimal::ZERO;
        assert!(matches!(
            fixture.validate(&BTreeSet::new()),
            Err(StorageError::InvalidFixture(_))
        ));
    }
}
