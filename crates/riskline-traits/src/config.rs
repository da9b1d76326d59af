//! Engine configuration.
//!
//! Every section deserialises with defaults, so a TOML file only needs the
//! keys it overrides:
//!
//! ```toml
//! [exposure]
//! max_staleness_days = 3
//!
//! [batch]
//! max_attempts = 5
//! critical_jobs = ["position_exposures"]
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::Symbol;

/// Longest lookback window any section accepts, in calendar days.
pub const MAX_LOOKBACK_DAYS: u32 = 3660;

// =============================================================================
// SECTIONS
// =============================================================================

/// Regression settings shared by every beta calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Minimum aligned observations for a regression
    pub min_observations: usize,
    /// Confidence level for significance classification (e.g. 0.95)
    pub confidence: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            min_observations: 20,
            confidence: 0.95,
        }
    }
}

/// Exposure cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Maximum snapshot age (days) that may be served from cache
    pub max_staleness_days: i64,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            max_staleness_days: 3,
        }
    }
}

/// Correlation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Lookback window in calendar days
    pub lookback_days: u32,
    /// Minimum overlapping observations for a pair to qualify on read
    pub min_overlap: usize,
    /// Maximum symbols in a displayed matrix
    pub max_symbols: usize,
    /// Calculations older than this are flagged stale on read
    pub stale_after_days: i64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            min_overlap: 30,
            max_symbols: 25,
            stale_after_days: 7,
        }
    }
}

/// Factor exposure settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorConfig {
    /// Lookback window in calendar days
    pub lookback_days: u32,
    /// Symmetric beta cap
    pub beta_cap: f64,
    /// Below this many observations a run is `Limited`
    pub limited_threshold: usize,
    /// At or above this many observations a run is `Full`
    pub full_threshold: usize,
    /// Factor results older than this are flagged stale on read
    pub stale_after_days: i64,
}

impl Default for FactorConfig {
    fn default() -> Self {
        Self {
            lookback_days: 150,
            beta_cap: 3.0,
            limited_threshold: 20,
            full_threshold: 90,
            stale_after_days: 7,
        }
    }
}

/// Market and interest-rate beta settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Market proxy symbol
    pub market_proxy: Symbol,
    /// Interest-rate proxy symbol
    pub rate_proxy: Symbol,
    /// Lookback window in calendar days
    pub lookback_days: u32,
    /// Symmetric beta cap
    pub beta_cap: f64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            market_proxy: Symbol::new("SPY"),
            rate_proxy: Symbol::new("TLT"),
            lookback_days: 150,
            beta_cap: 5.0,
        }
    }
}

/// Job runner and orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Attempts per job for transient failures (including the first)
    pub max_attempts: u32,
    /// First backoff delay
    pub initial_backoff_ms: u64,
    /// Backoff ceiling
    pub max_backoff_ms: u64,
    /// Backoff growth factor
    pub backoff_multiplier: f64,
    /// Per-attempt timeout
    pub job_timeout_secs: u64,
    /// Immediate retries allowed for rejected concurrent commits
    pub max_artifact_retries: u32,
    /// Jobs whose terminal failure skips the rest of that portfolio's sequence
    pub critical_jobs: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            job_timeout_secs: 120,
            max_artifact_retries: 2,
            critical_jobs: vec!["position_exposures".to_string()],
        }
    }
}

impl BatchConfig {
    /// Per-attempt timeout as a [`Duration`].
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Whether `job_name` is critical.
    pub fn is_critical(&self, job_name: &str) -> bool {
        self.critical_jobs.iter().any(|j| j == job_name)
    }
}

// =============================================================================
// ENGINE CONFIG
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Regression settings
    pub regression: RegressionConfig,
    /// Exposure cache settings
    pub exposure: ExposureConfig,
    /// Correlation settings
    pub correlation: CorrelationConfig,
    /// Factor exposure settings
    pub factors: FactorConfig,
    /// Market/rate beta settings
    pub benchmarks: BenchmarkConfig,
    /// Job runner settings
    pub batch: BatchConfig,
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl EngineConfig {
    /// Validate cross-field constraints. Empty means valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.regression.min_observations < 3 {
            errors.push(ValidationError::new(
                "regression.min_observations",
                "must be at least 3",
            ));
        }
        if !(self.regression.confidence > 0.0 && self.regression.confidence < 1.0) {
            errors.push(ValidationError::new(
                "regression.confidence",
                "must be in (0, 1)",
            ));
        }
        if self.exposure.max_staleness_days < 0 {
            errors.push(ValidationError::new(
                "exposure.max_staleness_days",
                "must not be negative",
            ));
        }
        for (field, days) in [
            ("correlation.lookback_days", self.correlation.lookback_days),
            ("factors.lookback_days", self.factors.lookback_days),
            ("benchmarks.lookback_days", self.benchmarks.lookback_days),
        ] {
            if days == 0 || days > MAX_LOOKBACK_DAYS {
                errors.push(ValidationError::new(
                    field,
                    format!("must be between 1 and {MAX_LOOKBACK_DAYS}"),
                ));
            }
        }
        if self.correlation.max_symbols < 2 {
            errors.push(ValidationError::new("correlation.max_symbols", "must be at least 2"));
        }
        if self.factors.beta_cap <= 0.0 || self.benchmarks.beta_cap <= 0.0 {
            errors.push(ValidationError::new("beta_cap", "caps must be positive"));
        }
        if self.factors.limited_threshold > self.factors.full_threshold {
            errors.push(ValidationError::new(
                "factors.limited_threshold",
                "must not exceed factors.full_threshold",
            ));
        }
        if self.batch.max_attempts == 0 {
            errors.push(ValidationError::new("batch.max_attempts", "must be at least 1"));
        }
        if self.batch.backoff_multiplier < 1.0 {
            errors.push(ValidationError::new(
                "batch.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if self.batch.job_timeout_secs == 0 {
            errors.push(ValidationError::new("batch.job_timeout_secs", "must be positive"));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_empty());
    }

    #[test]
    fn test_partial_deserialisation_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"batch": {"max_attempts": 5}}"#).unwrap();
        assert_eq!(config.batch.max_attempts, 5);
        assert_eq!(config.batch.initial_backoff_ms, 500);
        assert_eq!(config.exposure.max_staleness_days, 3);
    }

    #[test]
    fn test_invalid_thresholds_reported() {
        let mut config = EngineConfig::default();
        config.factors.limited_threshold = 100;
        config.batch.max_attempts = 0;
        let fields: Vec<_> = config.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"factors.limited_threshold".to_string()));
        assert!(fields.contains(&"batch.max_attempts".to_string()));
    }

    #[test]
    fn test_lookback_bounds() {
        let mut config = EngineConfig::default();
        config.factors.lookback_days = u32::MAX;
        config.benchmarks.lookback_days = 0;
        config.correlation.lookback_days = MAX_LOOKBACK_DAYS;
        let fields: Vec<_> = config.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["factors.lookback_days", "benchmarks.lookback_days"]);
    }

    #[test]
    fn test_critical_lookup() {
        let config = BatchConfig::default();
        assert!(config.is_critical("position_exposures"));
        assert!(!config.is_critical("correlations"));
    }
}
