//! CLI command implementations.

pub mod analytics;
pub mod config;
pub mod load;
pub mod run;
pub mod status;

pub use analytics::{AnalyticsArgs, BetasArgs, CorrelationArgs};
pub use config::ConfigArgs;
pub use load::LoadArgs;
pub use run::RunArgs;
pub use status::StatusArgs;

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use riskline_engine::{RiskEngine, RiskEngineBuilder};
use riskline_ext_redb::RedbStore;
use riskline_traits::{BatchRunId, PortfolioId};

use crate::cli::OutputFormat;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    /// Resolved configuration
    pub config: CliConfig,
    /// Output format
    pub format: OutputFormat,
    /// Suppress non-essential output
    pub quiet: bool,
}

impl Context {
    /// Open the configured store, creating the file and its directory if needed.
    pub fn open_store(&self) -> CliResult<Arc<RedbStore>> {
        let path = &self.config.storage_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "Opening store");
        Ok(Arc::new(RedbStore::open(path)?))
    }

    /// Open the store and build an engine over it.
    pub fn open_engine(&self) -> CliResult<(Arc<RedbStore>, RiskEngine)> {
        let store = self.open_store()?;
        let engine = RiskEngineBuilder::new()
            .with_config(self.config.engine.clone())
            .with_sources(store.data_sources())
            .build()?;
        Ok((store, engine))
    }
}

/// Parses a date string in YYYY-MM-DD format.
pub fn parse_date(s: &str) -> CliResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| CliError::InvalidDate(s.to_string()))
}

/// Parses an optional date, defaulting to today (UTC).
pub fn parse_date_or_today(s: Option<&str>) -> CliResult<NaiveDate> {
    match s {
        Some(s) => parse_date(s),
        None => Ok(chrono::Utc::now().date_naive()),
    }
}

/// Parses a batch run identifier.
pub fn parse_run_id(s: &str) -> CliResult<BatchRunId> {
    s.parse().map_err(|_| CliError::InvalidRunId(s.to_string()))
}

/// Portfolio ids from command-line strings.
pub fn portfolio_ids(raw: &[String]) -> Vec<PortfolioId> {
    raw.iter().map(|id| PortfolioId::new(id.trim())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-06-28").unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
        );
        assert!(matches!(parse_date("28/06/2024"), Err(CliError::InvalidDate(_))));
    }

    #[test]
    fn test_parse_run_id() {
        let id = BatchRunId::generate();
        assert_eq!(parse_run_id(&id.to_string()).unwrap(), id);
        assert!(matches!(parse_run_id("not-a-uuid"), Err(CliError::InvalidRunId(_))));
    }

    #[test]
    fn test_open_store_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context {
            config: CliConfig {
                storage_path: dir.path().join("nested").join("risk.redb"),
                ..CliConfig::default()
            },
            format: OutputFormat::Table,
            quiet: true,
        };

        let (store, _engine) = ctx.open_engine().unwrap();
        assert_eq!(store.table_counts().unwrap()["batch_runs"], 0);
        assert!(ctx.config.storage_path.exists());
    }
}
