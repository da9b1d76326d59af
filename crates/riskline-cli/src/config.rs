//! CLI configuration file.
//!
//! ```toml
//! storage_path = "./data/riskline.redb"
//!
//! [engine.correlation]
//! lookback_days = 60
//!
//! [engine.batch]
//! max_attempts = 5
//! ```
//!
//! Every field is optional; missing values fall back to the engine defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use riskline_traits::config::EngineConfig;

use crate::error::{CliError, CliResult};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "riskline.toml";

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Path of the redb database file
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/riskline.redb")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            engine: EngineConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> CliResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve the configuration to use.
    ///
    /// An explicit path must exist. Without one, `riskline.toml` in the
    /// working directory is used if present, else the defaults.
    pub fn load(explicit: Option<&Path>) -> CliResult<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> CliResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Fail with every validation problem joined into one message.
    pub fn validate(&self) -> CliResult<()> {
        let errors = self.engine.validate();
        if errors.is_empty() {
            return Ok(());
        }
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        Err(CliError::Config(messages.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = CliConfig::from_toml(
            r#"
            storage_path = "/tmp/risk.redb"

            [engine.correlation]
            lookback_days = 60

            [engine.batch]
            max_attempts = 5
            critical_jobs = ["position_exposures", "correlations"]
            "#,
        )
        .unwrap();

        assert_eq!(config.storage_path, PathBuf::from("/tmp/risk.redb"));
        assert_eq!(config.engine.correlation.lookback_days, 60);
        assert_eq!(config.engine.correlation.min_overlap, 30);
        assert_eq!(config.engine.batch.max_attempts, 5);
        assert_eq!(config.engine.batch.critical_jobs.len(), 2);
        assert_eq!(config.engine.exposure.max_staleness_days, 3);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(CliConfig::from_toml("").unwrap(), CliConfig::default());
    }

    #[test]
    fn test_rendered_default_parses_back() {
        let rendered = CliConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[engine.batch]"));
        assert_eq!(CliConfig::from_toml(&rendered).unwrap(), CliConfig::default());
    }

    #[test]
    fn test_validation_failure_reported() {
        let config = CliConfig::from_toml("[engine.batch]\nmax_attempts = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch.max_attempts"));
    }

    #[test]
    fn test_explicit_path_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine.exposure]\nmax_staleness_days = 1").unwrap();

        let config = CliConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.engine.exposure.max_staleness_days, 1);
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(CliConfig::load(Some(&missing)), Err(CliError::Io(_))));
    }
}
