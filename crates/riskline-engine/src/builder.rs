//! Builder for the risk engine.

use riskline_traits::config::EngineConfig;
use riskline_traits::DataSources;

use crate::error::EngineError;
use crate::RiskEngine;

/// Builder for constructing a [`RiskEngine`].
#[derive(Default)]
pub struct RiskEngineBuilder {
    config: Option<EngineConfig>,
    sources: Option<DataSources>,
}

impl RiskEngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the repositories and persistence gateway.
    pub fn with_sources(mut self, sources: DataSources) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<RiskEngine, EngineError> {
        let config = self.config.unwrap_or_default();

        let errors = config.validate();
        if !errors.is_empty() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(EngineError::ConfigError(messages.join("; ")));
        }

        let sources = self
            .sources
            .ok_or_else(|| EngineError::ConfigError("data sources not configured".into()))?;

        Ok(RiskEngine::new(sources, config))
    }
}
