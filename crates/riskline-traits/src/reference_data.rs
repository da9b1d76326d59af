//! Reference data repositories.
//!
//! - [`PortfolioRepository`]: Portfolio metadata and the active fleet
//! - [`PositionRepository`]: Positions by portfolio
//! - [`FactorDefinitionRepository`]: Risk factors and their proxy symbols
//!
//! All of these are read-only to the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TraitError;
use crate::ids::{FactorId, PortfolioId, Symbol};
use crate::portfolio::{Portfolio, Position};

// =============================================================================
// PORTFOLIOS
// =============================================================================

/// Read access to portfolio metadata.
#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    /// Get a portfolio by ID.
    async fn get(&self, id: &PortfolioId) -> Result<Option<Portfolio>, TraitError>;

    /// List every portfolio eligible for batch processing, ordered by ID.
    async fn list_active(&self) -> Result<Vec<Portfolio>, TraitError>;
}

// =============================================================================
// POSITIONS
// =============================================================================

/// Read access to positions.
#[async_trait]
pub trait PositionRepository: Send + Sync {
    /// Get all current positions for a portfolio, ordered by position ID.
    async fn get_positions(&self, portfolio_id: &PortfolioId) -> Result<Vec<Position>, TraitError>;
}

// =============================================================================
// FACTORS
// =============================================================================

/// A systematic risk factor represented by a proxy return series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorDefinition {
    /// Factor identifier
    pub id: FactorId,
    /// Display name
    pub name: String,
    /// Proxy ETF/index symbol whose returns represent the factor
    pub proxy_symbol: Symbol,
    /// Whether the factor participates in calculations
    pub active: bool,
    /// Ordering for display
    #[serde(default)]
    pub display_order: u32,
}

/// Read access to factor definitions.
#[async_trait]
pub trait FactorDefinitionRepository: Send + Sync {
    /// List active factors ordered by `display_order`.
    async fn list_active(&self) -> Result<Vec<FactorDefinition>, TraitError>;
}
