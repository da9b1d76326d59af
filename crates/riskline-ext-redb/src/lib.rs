//! # Riskline Ext Redb
//!
//! Embedded storage implementation using redb for the Riskline engine.
//!
//! [`RedbStore`] implements every repository trait and the persistence
//! gateway over one database file:
//! - Portfolios, positions and factor definitions
//! - Daily close history
//! - Exposure snapshots, regressions, factor betas and correlations
//! - Batch run headers and job results
//!
//! Reference and market data are seeded from JSON with [`FixtureFile`].
//!
//! ```rust,ignore
//! let store = Arc::new(RedbStore::open("./riskline.redb")?);
//! store.load_fixture(&FixtureFile::from_path("fixture.json")?)?;
//! let engine = RiskEngine::new(store.data_sources(), EngineConfig::default());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod fixture;
mod gateway;
mod keys;
mod reference_data;
mod store;

pub use error::{StorageError, StorageResult};
pub use fixture::{FixtureFile, LoadSummary};
pub use store::RedbStore;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::RedbStore;

    /// A store in a fresh temporary directory. Keep the guard alive.
    pub fn temp_store() -> (TempDir, Arc<RedbStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("riskline.redb")).unwrap();
        (dir, Arc::new(store))
    }
}
