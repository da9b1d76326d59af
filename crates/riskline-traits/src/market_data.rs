//! Market data repository.
//!
//! Market observations are an append-only daily close series per symbol.
//! During a batch run they are read-only.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TraitError;
use crate::ids::Symbol;

/// A daily closing price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Symbol
    pub symbol: Symbol,
    /// Observation date
    pub date: NaiveDate,
    /// Closing price
    pub close: Decimal,
}

/// Read access to historical prices.
#[async_trait]
pub trait MarketDataRepository: Send + Sync {
    /// Get closes for each symbol in `[start, end]`, sorted ascending by date.
    ///
    /// Symbols with no observations in the range are absent from the map.
    async fn get_price_history(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<Symbol, Vec<PricePoint>>, TraitError>;

    /// Get the most recent close on or before `as_of` for each symbol.
    async fn get_latest_prices(
        &self,
        symbols: &[Symbol],
        as_of: NaiveDate,
    ) -> Result<HashMap<Symbol, PricePoint>, TraitError>;
}
