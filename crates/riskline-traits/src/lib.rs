//! # Riskline Traits
//!
//! Data model, configuration and repository trait definitions for the
//! Riskline batch analytics engine.
//!
//! This crate contains ONLY types and trait definitions. All implementations
//! are in separate extension crates (`riskline-ext-memory`, `riskline-ext-redb`).
//!
//! ## Module Structure
//!
//! - [`ids`]: Identifier newtypes (portfolios, positions, factors, batch runs)
//! - [`portfolio`]: Portfolios, positions and position type conventions
//! - [`market_data`]: Price observations and the market data repository
//! - [`reference_data`]: Portfolio, position and factor definition repositories
//! - [`analytics`]: Persisted calculation entities (regressions, exposures, correlations, factor betas)
//! - [`batch`]: Batch run and job result records, job state machine
//! - [`storage`]: Persistence gateway and natural-key write batches
//! - [`availability`]: Structured "not available" read payloads
//! - [`config`]: Engine configuration
//!
//! ## Dependency Injection
//!
//! The engine consumes these traits through a [`DataSources`] bundle:
//!
//! ```ignore
//! RiskEngineBuilder::new()
//!     .with_config(EngineConfig::default())
//!     .with_sources(DataSources { portfolios, positions, market_data, factors, gateway })
//!     .build()
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analytics;
pub mod availability;
pub mod batch;
pub mod config;
pub mod error;
pub mod ids;
pub mod market_data;
pub mod portfolio;
pub mod reference_data;
pub mod storage;

use std::sync::Arc;

// Re-export commonly used types
pub use availability::{Availability, UnavailableReason};
pub use error::TraitError;
pub use ids::*;

/// Bundle of every external collaborator the engine reads from or writes to.
#[derive(Clone)]
pub struct DataSources {
    /// Portfolio metadata (equity balance, value)
    pub portfolios: Arc<dyn reference_data::PortfolioRepository>,
    /// Positions by portfolio
    pub positions: Arc<dyn reference_data::PositionRepository>,
    /// Price history
    pub market_data: Arc<dyn market_data::MarketDataRepository>,
    /// Active factor definitions
    pub factors: Arc<dyn reference_data::FactorDefinitionRepository>,
    /// Result persistence
    pub gateway: Arc<dyn storage::PersistenceGateway>,
}
