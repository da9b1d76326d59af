//! Portfolios and positions.
//!
//! These are read-only inputs to the engine: onboarding and validation happen
//! upstream.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{PortfolioId, PositionId, Symbol};

/// Standard equity option contract size.
pub const OPTION_CONTRACT_MULTIPLIER: Decimal = Decimal::ONE_HUNDRED;

/// Portfolio metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    /// Portfolio identifier
    pub id: PortfolioId,
    /// Display name
    pub name: String,
    /// Equity (NAV) balance used to scale portfolio-level betas
    pub equity_balance: Decimal,
    /// Last known market value, if the upstream system tracks one
    pub current_value: Option<Decimal>,
}

/// Position type. Determines sign convention and contract multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionType {
    /// Long equity/ETF
    Long,
    /// Short equity/ETF
    Short,
    /// Long call option
    LongCall,
    /// Short call option
    ShortCall,
    /// Long put option
    LongPut,
    /// Short put option
    ShortPut,
}

impl PositionType {
    /// True for any option variant.
    pub fn is_option(&self) -> bool {
        !matches!(self, PositionType::Long | PositionType::Short)
    }

    /// True for short-side positions.
    pub fn is_short(&self) -> bool {
        matches!(
            self,
            PositionType::Short | PositionType::ShortCall | PositionType::ShortPut
        )
    }

    /// Units per contract: 100 for options, 1 otherwise.
    pub fn contract_multiplier(&self) -> Decimal {
        if self.is_option() {
            OPTION_CONTRACT_MULTIPLIER
        } else {
            Decimal::ONE
        }
    }

    /// +1 for long-side positions, -1 for short-side positions.
    pub fn exposure_sign(&self) -> Decimal {
        if self.is_short() {
            Decimal::NEGATIVE_ONE
        } else {
            Decimal::ONE
        }
    }
}

/// A holding in a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Position identifier
    pub id: PositionId,
    /// Owning portfolio
    pub portfolio_id: PortfolioId,
    /// Instrument symbol (option symbols for option positions)
    pub symbol: Symbol,
    /// Underlying equity for options
    #[serde(default)]
    pub underlying_symbol: Option<Symbol>,
    /// Signed quantity (shares or contracts)
    pub quantity: Decimal,
    /// Position type
    pub position_type: PositionType,
    /// Entry price per unit
    pub entry_price: Decimal,
    /// Entry date
    pub entry_date: NaiveDate,
    /// Last observed price, used when no market observation is available
    #[serde(default)]
    pub last_price: Option<Decimal>,
}

impl Position {
    /// Symbol whose return series drives this position's risk.
    ///
    /// Options are regressed through their underlying.
    pub fn return_symbol(&self) -> &Symbol {
        if self.position_type.is_option() {
            self.underlying_symbol.as_ref().unwrap_or(&self.symbol)
        } else {
            &self.symbol
        }
    }

    /// Signed exposure at `price`: `|quantity| * price * multiplier * sign`.
    pub fn signed_exposure(&self, price: Decimal) -> Decimal {
        self.quantity.abs()
            * price
            * self.position_type.contract_multiplier()
            * self.position_type.exposure_sign()
    }

    /// True if the position was opened on or before `date`.
    pub fn is_open_on(&self, date: NaiveDate) -> bool {
        self.entry_date <= date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(position_type: PositionType, quantity: Decimal) -> Position {
        Position {
            id: PositionId::new("P1"),
            portfolio_id: PortfolioId::new("PF"),
            symbol: Symbol::new("AAPL250117C00200000"),
            underlying_symbol: Some(Symbol::new("AAPL")),
            quantity,
            position_type,
            entry_price: dec!(5),
            entry_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            last_price: None,
        }
    }

    #[test]
    fn test_sign_convention() {
        assert_eq!(position(PositionType::Long, dec!(10)).signed_exposure(dec!(2)), dec!(20));
        // Quantity sign is ignored; the type decides direction
        assert_eq!(position(PositionType::Short, dec!(-10)).signed_exposure(dec!(2)), dec!(-20));
        assert_eq!(position(PositionType::Short, dec!(10)).signed_exposure(dec!(2)), dec!(-20));
    }

    #[test]
    fn test_option_multiplier() {
        assert_eq!(
            position(PositionType::LongCall, dec!(2)).signed_exposure(dec!(3.5)),
            dec!(700)
        );
        assert_eq!(
            position(PositionType::ShortPut, dec!(-1)).signed_exposure(dec!(4)),
            dec!(-400)
        );
    }

    #[test]
    fn test_return_symbol_uses_underlying_for_options() {
        let option = position(PositionType::LongPut, dec!(1));
        assert_eq!(option.return_symbol().as_str(), "AAPL");

        let mut stock = position(PositionType::Long, dec!(1));
        stock.symbol = Symbol::new("MSFT");
        assert_eq!(stock.return_symbol().as_str(), "MSFT");
    }
}
