//! # Riskline Engine
//!
//! Batch orchestration and canonical analytics for portfolio risk.
//!
//! This crate provides:
//! - [`ExposureCache`]: staleness-gated net/gross exposure snapshots
//! - [`CorrelationEngine`]: pairwise correlations, display matrix, diversification score
//! - [`FactorExposureEngine`]: position and portfolio factor betas
//! - [`BenchmarkBetaEngine`]: market and interest-rate betas
//! - [`JobRunner`]: retry, timeout and commit-on-success for one job
//! - [`BatchOrchestrator`]: portfolio loop, critical short-circuit, cancellation
//! - [`RiskEngine`]: the engine wiring, exposing [`BatchService`] and [`AnalyticsService`]
//!
//! ## Architecture
//!
//! ```text
//! BatchOrchestrator ─> JobRunner ─┬─> PositionExposuresJob ─> ExposureCache
//!                                 ├─> BenchmarkBetaJob ─────> BenchmarkBetaEngine
//!                                 ├─> FactorExposuresJob ───> FactorExposureEngine
//!                                 └─> CorrelationsJob ──────> CorrelationEngine
//!                                            │
//!                                            └─> JobScope ─(commit)─> PersistenceGateway
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let engine = RiskEngineBuilder::new()
//!     .with_config(EngineConfig::default())
//!     .with_sources(sources)
//!     .build()?;
//!
//! let summary = engine.run_batch(BatchRequest::for_date(date)).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod benchmark;
pub mod builder;
pub mod cache;
pub mod context;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod factor_exposure;
pub mod jobs;
pub mod orchestrator;
pub mod runner;
pub mod services;
pub mod tracker;

// Re-exports
pub use benchmark::{BenchmarkBetaEngine, BenchmarkBetaRun, BenchmarkBetasView};
pub use builder::RiskEngineBuilder;
pub use cache::{compute_exposures, ExposureCache, ExposureTotals, PositionValue, PriceSource};
pub use context::EngineContext;
pub use correlation::{CorrelationEngine, CorrelationMatrix, CorrelationRun, DiversificationScore};
pub use engine::RiskEngine;
pub use error::{EngineError, EngineResult};
pub use factor_exposure::{FactorExposureEngine, FactorExposureRun, FactorExposureView};
pub use jobs::{CalculationJob, JobOutcome, JobScope};
pub use orchestrator::{BatchOrchestrator, BatchRequest, BatchSummary, FailedJob};
pub use runner::{JobExecution, JobRunner, RetryPolicy};
pub use services::{
    AnalyticsService, BatchService, BatchStatusView, CorrelationQuery, PortfolioExposures,
    TriggerResponse, TriggerStatus,
};
pub use tracker::BatchRunTracker;
