//! Shared calculation context: data sources, configuration and the
//! regression engine every analytics service draws from.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::ToPrimitive;

use riskline_math::regression::RegressionEngine;
use riskline_math::stats::{simple_returns, ReturnSeries};
use riskline_traits::config::EngineConfig;
use riskline_traits::portfolio::Portfolio;
use riskline_traits::{DataSources, PortfolioId, Symbol};

use crate::error::{EngineError, EngineResult};

/// Context shared by the engines and jobs of one [`crate::RiskEngine`].
pub struct EngineContext {
    /// Injected repositories and persistence gateway
    pub sources: DataSources,
    /// Engine configuration
    pub config: EngineConfig,
    /// Regression engine configured with the minimum observation count
    pub regression: RegressionEngine,
}

impl EngineContext {
    /// Create a new context.
    pub fn new(sources: DataSources, config: EngineConfig) -> Self {
        let regression = RegressionEngine::new(config.regression.min_observations);
        Self {
            sources,
            config,
            regression,
        }
    }

    /// Load a portfolio, failing with [`EngineError::NotFound`] if unknown.
    pub async fn portfolio(&self, id: &PortfolioId) -> EngineResult<Portfolio> {
        self.sources
            .portfolios
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("portfolio {id}")))
    }

    /// Daily simple returns for each symbol over `[start, end]`.
    ///
    /// Symbols without at least two closes in the window are absent.
    pub async fn return_series(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<HashMap<Symbol, ReturnSeries>> {
        let history = self
            .sources
            .market_data
            .get_price_history(symbols, start, end)
            .await?;

        let mut series = HashMap::with_capacity(history.len());
        for (symbol, points) in history {
            let closes: Vec<(NaiveDate, f64)> = points
                .iter()
                .filter_map(|p| p.close.to_f64().map(|c| (p.date, c)))
                .collect();
            let returns = simple_returns(&closes);
            if !returns.is_empty() {
                series.insert(symbol, returns);
            }
        }
        Ok(series)
    }
}

/// First date of a lookback window ending at `date`.
///
/// Fails with [`EngineError::InputValidation`] when the window reaches
/// outside the representable calendar.
pub fn window_start(date: NaiveDate, lookback_days: u32) -> EngineResult<NaiveDate> {
    date.checked_sub_signed(Duration::days(i64::from(lookback_days)))
        .ok_or_else(|| {
            EngineError::InputValidation(format!(
                "lookback of {lookback_days} days before {date} is out of range"
            ))
        })
}
