//! Daily close series.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use riskline_traits::market_data::{MarketDataRepository, PricePoint};
use riskline_traits::{Symbol, TraitError};

use crate::MemoryStore;

impl MemoryStore {
    /// Insert closes for a symbol, replacing existing dates.
    pub fn insert_prices(&self, symbol: impl Into<Symbol>, closes: &[(NaiveDate, Decimal)]) {
        let mut prices = self.prices.write();
        let series = prices.entry(symbol.into()).or_default();
        for (date, close) in closes {
            series.insert(*date, *close);
        }
    }
}

#[async_trait]
impl MarketDataRepository for MemoryStore {
    async fn get_price_history(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<Symbol, Vec<PricePoint>>, TraitError> {
        if start > end {
            return Err(TraitError::InvalidInput(format!(
                "history window starts {start} after it ends {end}"
            )));
        }

        let prices = self.prices.read();
        let mut history = HashMap::new();
        for symbol in symbols {
            let Some(series) = prices.get(symbol) else {
                continue;
            };
            let points: Vec<PricePoint> = series
                .range(start..=end)
                .map(|(date, close)| PricePoint {
                    symbol: symbol.clone(),
                    date: *date,
                    close: *close,
                })
                .collect();
            if !points.is_empty() {
                history.insert(symbol.clone(), points);
            }
        }
        Ok(history)
    }

    async fn get_latest_prices(
        &self,
        symbols: &[Symbol],
        as_of: NaiveDate,
    ) -> Result<HashMap<Symbol, PricePoint>, TraitError> {
        let prices = self.prices.read();
        let latest = symbols
            .iter()
            .filter_map(|symbol| {
                let (date, close) = prices.get(symbol)?.range(..=as_of).next_back()?;
                Some((
                    symbol.clone(),
                    PricePoint {
                        symbol: symbol.clone(),
                        date: *date,
                        close: *close,
                    },
                ))
            })
            .collect();
        Ok(latest)
    }
}
