//! # Riskline Ext Memory
//!
//! In-memory implementations of every Riskline repository and of the
//! persistence gateway.
//!
//! A single [`MemoryStore`] backs all five traits, so tests and fixtures can
//! seed reference data, run batches and inspect what was committed through
//! one handle:
//!
//! ```ignore
//! let store = Arc::new(MemoryStore::new());
//! store.insert_portfolio(portfolio);
//! store.insert_prices("AAPL", &closes);
//! let engine = RiskEngine::new(store.data_sources(), EngineConfig::default());
//! ```
//!
//! Fault hooks ([`MemoryStore::fail_next_commits`],
//! [`MemoryStore::fail_positions_for`], [`MemoryStore::set_healthy`]) let tests
//! drive the engine's retry and failure paths.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod gateway;
mod market_data;
mod reference_data;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;

use riskline_traits::analytics::{
    BenchmarkKind, BetaSubject, CorrelationCalculation, ExposureSnapshot, FactorBeta,
    PairwiseCorrelation, RegressionResult,
};
use riskline_traits::batch::{BatchRun, JobResult};
use riskline_traits::portfolio::{Portfolio, Position};
use riskline_traits::reference_data::FactorDefinition;
use riskline_traits::{
    BatchRunId, CalculationId, DataSources, FactorId, PortfolioId, Symbol, TraitError,
};

/// Persisted calculation tables, keyed by natural key.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) regressions:
        BTreeMap<(PortfolioId, BenchmarkKind, NaiveDate, BetaSubject), RegressionResult>,
    pub(crate) factor_betas: BTreeMap<(PortfolioId, NaiveDate, FactorId, BetaSubject), FactorBeta>,
    pub(crate) snapshots: BTreeMap<(PortfolioId, NaiveDate), ExposureSnapshot>,
    pub(crate) correlations: BTreeMap<(PortfolioId, u32, NaiveDate), CorrelationCalculation>,
    pub(crate) pairs: BTreeMap<CalculationId, BTreeMap<(Symbol, Symbol), PairwiseCorrelation>>,
    pub(crate) batch_runs: BTreeMap<BatchRunId, BatchRun>,
    pub(crate) job_results: BTreeMap<(BatchRunId, String, PortfolioId), JobResult>,
}

/// Row counts per table, for idempotence checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    /// Regression rows
    pub regressions: usize,
    /// Factor beta rows
    pub factor_betas: usize,
    /// Exposure snapshots
    pub snapshots: usize,
    /// Correlation headers
    pub correlations: usize,
    /// Pairwise correlations
    pub pairs: usize,
    /// Batch runs
    pub batch_runs: usize,
    /// Job results
    pub job_results: usize,
}

/// In-memory store implementing every repository and the gateway.
#[derive(Default)]
pub struct MemoryStore {
    pub(crate) portfolios: RwLock<BTreeMap<PortfolioId, Portfolio>>,
    pub(crate) positions: RwLock<BTreeMap<PortfolioId, Vec<Position>>>,
    pub(crate) position_failures: RwLock<HashMap<PortfolioId, TraitError>>,
    pub(crate) prices: RwLock<BTreeMap<Symbol, BTreeMap<NaiveDate, Decimal>>>,
    pub(crate) factors: RwLock<Vec<FactorDefinition>>,
    pub(crate) tables: RwLock<Tables>,
    pub(crate) commit_faults: Mutex<VecDeque<TraitError>>,
    pub(crate) commits: AtomicUsize,
    pub(crate) unhealthy: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle this store as every data source of an engine.
    pub fn data_sources(self: &Arc<Self>) -> DataSources {
        DataSources {
            portfolios: self.clone(),
            positions: self.clone(),
            market_data: self.clone(),
            factors: self.clone(),
            gateway: self.clone(),
        }
    }

    // === Fault injection ===

    /// Fail the next commits, one queued error per commit.
    pub fn fail_next_commits(&self, count: usize, error: TraitError) {
        let mut faults = self.commit_faults.lock();
        for _ in 0..count {
            faults.push_back(error.clone());
        }
    }

    /// Fail every position read for a portfolio.
    pub fn fail_positions_for(&self, portfolio_id: &PortfolioId, error: TraitError) {
        self.position_failures
            .write()
            .insert(portfolio_id.clone(), error);
    }

    /// Toggle the gateway health check.
    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    /// Successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    // === Inspection ===

    /// Row counts of every persisted table.
    pub fn table_counts(&self) -> TableCounts {
        let tables = self.tables.read();
        TableCounts {
            regressions: tables.regressions.len(),
            factor_betas: tables.factor_betas.len(),
            snapshots: tables.snapshots.len(),
            correlations: tables.correlations.len(),
            pairs: tables.pairs.values().map(BTreeMap::len).sum(),
            batch_runs: tables.batch_runs.len(),
            job_results: tables.job_results.len(),
        }
    }
}
