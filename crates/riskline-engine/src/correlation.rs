//! Pairwise correlation and diversification.
//!
//! The batch job computes Pearson correlations of daily returns for every
//! pair of symbols held by a portfolio and persists them under a
//! [`CorrelationCalculation`] header. Reads select the latest header for a
//! `(portfolio, lookback)` and derive either a display matrix or the weighted
//! diversification score:
//!
//! ```text
//! score = Σ_{i<j} w_i·w_j·|corr_ij|  /  Σ_{i<j} w_i·w_j
//! ```
//!
//! where `w_i` is the symbol's share of current gross exposure.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use riskline_math::stats::{align_returns, pearson};
use riskline_traits::analytics::{CorrelationCalculation, PairwiseCorrelation};
use riskline_traits::storage::WriteOp;
use riskline_traits::{Availability, CalculationId, PortfolioId, Symbol, UnavailableReason};

use crate::cache::{ExposureCache, PositionValue};
use crate::context::{window_start, EngineContext};
use crate::error::{EngineError, EngineResult};
use crate::jobs::JobScope;

/// Pairs with fewer overlapping returns than this are never stored.
pub const MIN_PAIR_OBSERVATIONS: usize = 3;

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Result of a correlation calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationRun {
    /// Persisted header
    pub calculation: CorrelationCalculation,
    /// Pairs stored
    pub pair_count: usize,
    /// Held symbols with no return data in the window
    pub symbols_without_data: Vec<Symbol>,
}

impl CorrelationRun {
    /// Data-quality note for the job result.
    pub fn detail(&self) -> Option<String> {
        if self.symbols_without_data.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.symbols_without_data.iter().map(Symbol::as_str).collect();
        Some(format!("no return data for: {}", names.join(", ")))
    }
}

/// Weighted average absolute correlation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedScore {
    /// Score in [0, 1]
    pub score: f64,
    /// Symbols contributing
    pub symbol_count: usize,
    /// Pairs contributing
    pub pair_count: usize,
}

/// Display matrix read payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    /// Source calculation
    pub calculation_id: CalculationId,
    /// Source calculation date
    pub calculation_date: NaiveDate,
    /// Lookback window
    pub lookback_days: u32,
    /// Symbols by descending gross weight
    pub symbols: Vec<Symbol>,
    /// Gross weight of each symbol, aligned with `symbols`
    pub weights: Vec<f64>,
    /// Symmetric matrix with unit diagonal; `None` where no qualifying pair exists
    pub matrix: Vec<Vec<Option<f64>>>,
    /// Minimum overlap applied
    pub min_overlap: usize,
    /// Calculation is older than the staleness threshold
    pub stale: bool,
}

/// Diversification score read payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiversificationScore {
    /// Source calculation
    pub calculation_id: CalculationId,
    /// Source calculation date
    pub calculation_date: NaiveDate,
    /// Lookback window
    pub lookback_days: u32,
    /// Weighted average absolute correlation in [0, 1]; lower is more diversified
    pub score: f64,
    /// Symbols contributing
    pub symbol_count: usize,
    /// Pairs contributing
    pub pair_count: usize,
    /// Calculation is older than the staleness threshold
    pub stale: bool,
}

// =============================================================================
// PURE HELPERS
// =============================================================================

/// Gross exposure per return symbol. Options are attributed to their underlying.
pub fn gross_by_symbol(values: &[PositionValue]) -> BTreeMap<Symbol, Decimal> {
    let mut gross: BTreeMap<Symbol, Decimal> = BTreeMap::new();
    for value in values {
        *gross
            .entry(value.position.return_symbol().clone())
            .or_insert(Decimal::ZERO) += value.exposure.abs();
    }
    gross
}

/// Normalise gross exposures over `symbols` into weights summing to one.
pub fn normalised_weights(
    gross: &BTreeMap<Symbol, Decimal>,
    symbols: &[Symbol],
) -> HashMap<Symbol, f64> {
    let total: Decimal = symbols.iter().filter_map(|s| gross.get(s)).copied().sum();
    let total = total.to_f64().unwrap_or(0.0);

    symbols
        .iter()
        .map(|s| {
            let g = gross.get(s).and_then(Decimal::to_f64).unwrap_or(0.0);
            let w = if total > 0.0 { g / total } else { 0.0 };
            (s.clone(), w)
        })
        .collect()
}

/// Weighted diversification score over pairs with at least `min_overlap`
/// observations. `None` when fewer than two weighted symbols qualify.
pub fn weighted_correlation(
    weights: &HashMap<Symbol, f64>,
    pairs: &[PairwiseCorrelation],
    min_overlap: usize,
) -> Option<WeightedScore> {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    let mut symbols = BTreeSet::new();
    let mut pair_count = 0;

    for pair in pairs.iter().filter(|p| p.data_points >= min_overlap) {
        let wa = weights.get(&pair.symbol_a).copied().unwrap_or(0.0);
        let wb = weights.get(&pair.symbol_b).copied().unwrap_or(0.0);
        let w = wa * wb;
        if w <= 0.0 || !pair.correlation.is_finite() {
            continue;
        }
        numerator += w * pair.correlation.abs();
        denominator += w;
        symbols.insert(&pair.symbol_a);
        symbols.insert(&pair.symbol_b);
        pair_count += 1;
    }

    if symbols.len() < 2 || denominator <= 0.0 {
        return None;
    }

    Some(WeightedScore {
        score: (numerator / denominator).clamp(0.0, 1.0),
        symbol_count: symbols.len(),
        pair_count,
    })
}

/// Order symbols by descending weight, ties by symbol, and keep `max_symbols`.
pub fn rank_symbols(
    candidates: impl IntoIterator<Item = Symbol>,
    weights: &HashMap<Symbol, f64>,
    max_symbols: usize,
) -> Vec<Symbol> {
    let mut ranked: Vec<Symbol> = candidates.into_iter().collect();
    ranked.sort_by(|a, b| {
        let wa = weights.get(a).copied().unwrap_or(0.0);
        let wb = weights.get(b).copied().unwrap_or(0.0);
        wb.total_cmp(&wa).then_with(|| a.cmp(b))
    });
    ranked.truncate(max_symbols);
    ranked
}

/// Symmetric matrix over `symbols` with an exact unit diagonal.
pub fn build_matrix(
    symbols: &[Symbol],
    pairs: &HashMap<(Symbol, Symbol), f64>,
) -> Vec<Vec<Option<f64>>> {
    let n = symbols.len();
    let mut matrix = vec![vec![None; n]; n];
    for i in 0..n {
        matrix[i][i] = Some(1.0);
        for j in (i + 1)..n {
            let key = if symbols[i] <= symbols[j] {
                (symbols[i].clone(), symbols[j].clone())
            } else {
                (symbols[j].clone(), symbols[i].clone())
            };
            if let Some(c) = pairs.get(&key) {
                matrix[i][j] = Some(*c);
                matrix[j][i] = Some(*c);
            }
        }
    }
    matrix
}

// =============================================================================
// ENGINE
// =============================================================================

/// Correlation and diversification engine.
pub struct CorrelationEngine {
    ctx: Arc<EngineContext>,
    cache: Arc<ExposureCache>,
}

impl CorrelationEngine {
    /// Create a new correlation engine.
    pub fn new(ctx: Arc<EngineContext>, cache: Arc<ExposureCache>) -> Self {
        Self { ctx, cache }
    }

    /// Compute and stage pairwise correlations for the scope's portfolio.
    pub async fn calculate_correlations(
        &self,
        lookback_days: u32,
        scope: &mut JobScope,
    ) -> EngineResult<CorrelationRun> {
        let portfolio_id = scope.portfolio_id().clone();
        let date = scope.calculation_date();

        let values = self.cache.position_values(&portfolio_id, date).await?;
        let gross = gross_by_symbol(&values);
        let symbols: Vec<Symbol> = gross.keys().cloned().collect();
        if symbols.len() < 2 {
            return Err(EngineError::InsufficientData(format!(
                "{} distinct symbol(s) held, need at least 2",
                symbols.len()
            )));
        }

        let series = self
            .ctx
            .return_series(&symbols, window_start(date, lookback_days)?, date)
            .await?;

        let (with_data, without_data): (Vec<Symbol>, Vec<Symbol>) =
            symbols.into_iter().partition(|s| series.contains_key(s));
        if with_data.len() < 2 {
            return Err(EngineError::InsufficientData(format!(
                "{} symbol(s) with return data in the {lookback_days}-day window",
                with_data.len()
            )));
        }

        let calculation_id = CalculationId::generate();
        let mut pairs = Vec::new();
        for (i, a) in with_data.iter().enumerate() {
            for b in &with_data[i + 1..] {
                let (xa, xb) = align_returns(&series[a], &series[b]);
                if xa.len() < MIN_PAIR_OBSERVATIONS {
                    continue;
                }
                if let Some(c) = pearson(&xa, &xb) {
                    pairs.push(PairwiseCorrelation::new(
                        calculation_id,
                        a.clone(),
                        b.clone(),
                        c,
                        xa.len(),
                    ));
                }
            }
        }

        let weights = normalised_weights(&gross, &with_data);
        let overall = weighted_correlation(&weights, &pairs, self.ctx.config.correlation.min_overlap)
            .map(|w| w.score);

        debug!(
            portfolio = %portfolio_id,
            symbols = with_data.len(),
            pairs = pairs.len(),
            ?overall,
            "Correlations calculated"
        );

        let calculation = CorrelationCalculation {
            id: calculation_id,
            portfolio_id,
            lookback_days,
            calculation_date: date,
            symbols: with_data,
            overall_correlation: overall,
            created_at: Utc::now(),
        };
        let pair_count = pairs.len();
        scope.stage(WriteOp::Correlation {
            header: calculation.clone(),
            pairs,
        });

        Ok(CorrelationRun {
            calculation,
            pair_count,
            symbols_without_data: without_data,
        })
    }

    /// Display matrix from the latest calculation on or before `as_of`.
    pub async fn get_matrix(
        &self,
        portfolio_id: &PortfolioId,
        lookback_days: u32,
        min_overlap: usize,
        max_symbols: usize,
        as_of: NaiveDate,
    ) -> EngineResult<Availability<CorrelationMatrix>> {
        self.ctx.portfolio(portfolio_id).await?;

        let Some((header, pairs)) = self
            .ctx
            .sources
            .gateway
            .latest_correlation(portfolio_id, lookback_days, as_of)
            .await?
        else {
            return Ok(Availability::unavailable(
                UnavailableReason::NoCalculationAvailable,
            ));
        };

        let qualifying: HashMap<(Symbol, Symbol), f64> = pairs
            .into_iter()
            .filter(|p| p.data_points >= min_overlap)
            .map(|p| ((p.symbol_a, p.symbol_b), p.correlation))
            .collect();
        let candidates: BTreeSet<Symbol> = qualifying
            .keys()
            .flat_map(|(a, b)| [a.clone(), b.clone()])
            .collect();
        if candidates.len() < 2 {
            return Ok(Availability::unavailable_with(
                UnavailableReason::InsufficientSymbols,
                format!("fewer than two symbols with at least {min_overlap} overlapping returns"),
            ));
        }

        let values = self.cache.position_values(portfolio_id, as_of).await?;
        let gross = gross_by_symbol(&values);
        let weights = normalised_weights(&gross, &header.symbols);

        let symbols = rank_symbols(candidates, &weights, max_symbols);
        let matrix = build_matrix(&symbols, &qualifying);
        let symbol_weights = symbols
            .iter()
            .map(|s| weights.get(s).copied().unwrap_or(0.0))
            .collect();

        Ok(Availability::Available(CorrelationMatrix {
            calculation_id: header.id,
            calculation_date: header.calculation_date,
            lookback_days,
            symbols,
            weights: symbol_weights,
            matrix,
            min_overlap,
            stale: self.is_stale(header.calculation_date, as_of),
        }))
    }

    /// Weighted diversification score over the full calculation symbol set.
    pub async fn get_weighted_correlation(
        &self,
        portfolio_id: &PortfolioId,
        lookback_days: u32,
        min_overlap: usize,
        as_of: NaiveDate,
    ) -> EngineResult<Availability<DiversificationScore>> {
        self.ctx.portfolio(portfolio_id).await?;

        let Some((header, pairs)) = self
            .ctx
            .sources
            .gateway
            .latest_correlation(portfolio_id, lookback_days, as_of)
            .await?
        else {
            return Ok(Availability::unavailable(
                UnavailableReason::NoCalculationAvailable,
            ));
        };

        let values = self.cache.position_values(portfolio_id, as_of).await?;
        let weights = normalised_weights(&gross_by_symbol(&values), &header.symbols);

        match weighted_correlation(&weights, &pairs, min_overlap) {
            Some(weighted) => Ok(Availability::Available(DiversificationScore {
                calculation_id: header.id,
                calculation_date: header.calculation_date,
                lookback_days,
                score: weighted.score,
                symbol_count: weighted.symbol_count,
                pair_count: weighted.pair_count,
                stale: self.is_stale(header.calculation_date, as_of),
            })),
            None => Ok(Availability::unavailable(UnavailableReason::InsufficientSymbols)),
        }
    }

    fn is_stale(&self, calculation_date: NaiveDate, as_of: NaiveDate) -> bool {
        (as_of - calculation_date).num_days() > self.ctx.config.correlation.stale_after_days
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s)
    }

    fn pair(a: &str, b: &str, c: f64, n: usize) -> PairwiseCorrelation {
        PairwiseCorrelation::new(CalculationId::generate(), sym(a), sym(b), c, n)
    }

    #[test]
    fn test_two_equal_weights() {
        let weights: HashMap<Symbol, f64> = [(sym("AAPL"), 0.5), (sym("MSFT"), 0.5)].into();
        let score = weighted_correlation(&weights, &[pair("AAPL", "MSFT", 0.8, 60)], 30).unwrap();
        approx::assert_relative_eq!(score.score, 0.8, epsilon = 1e-12);
        assert_eq!(score.symbol_count, 2);
    }

    #[test]
    fn test_absolute_correlations_and_weighting() {
        let weights: HashMap<Symbol, f64> =
            [(sym("A"), 0.5), (sym("B"), 0.3), (sym("C"), 0.2)].into();
        let pairs = [pair("A", "B", -0.6, 60), pair("A", "C", 0.2, 60), pair("B", "C", 0.9, 60)];

        let score = weighted_correlation(&weights, &pairs, 30).unwrap();
        let expected = (0.15 * 0.6 + 0.10 * 0.2 + 0.06 * 0.9) / (0.15 + 0.10 + 0.06);
        approx::assert_relative_eq!(score.score, expected, epsilon = 1e-12);
        assert!((0.0..=1.0).contains(&score.score));
    }

    #[test]
    fn test_insufficient_overlap_or_weight() {
        let weights: HashMap<Symbol, f64> = [(sym("A"), 1.0), (sym("B"), 0.0)].into();
        assert!(weighted_correlation(&weights, &[pair("A", "B", 0.5, 60)], 30).is_none());

        let weights: HashMap<Symbol, f64> = [(sym("A"), 0.5), (sym("B"), 0.5)].into();
        assert!(weighted_correlation(&weights, &[pair("A", "B", 0.5, 10)], 30).is_none());
    }

    #[test]
    fn test_matrix_symmetric_with_unit_diagonal() {
        let weights: HashMap<Symbol, f64> =
            [(sym("A"), 0.2), (sym("B"), 0.5), (sym("C"), 0.3)].into();
        let symbols = rank_symbols([sym("A"), sym("B"), sym("C")], &weights, 10);
        assert_eq!(symbols, vec![sym("B"), sym("C"), sym("A")]);

        let pairs: HashMap<(Symbol, Symbol), f64> =
            [((sym("A"), sym("B")), 0.4), ((sym("B"), sym("C")), -0.1)].into();
        let matrix = build_matrix(&symbols, &pairs);

        for i in 0..3 {
            assert_eq!(matrix[i][i], Some(1.0));
            for j in 0..3 {
                assert_eq!(matrix[i][j], matrix[j][i]);
            }
        }
        // A-C never qualified
        assert_eq!(matrix[1][2], None);
        assert_eq!(matrix[0][2], Some(0.4));
    }

    #[test]
    fn test_rank_ties_and_truncation() {
        let weights: HashMap<Symbol, f64> = [(sym("B"), 0.5), (sym("A"), 0.5)].into();
        let ranked = rank_symbols([sym("B"), sym("A"), sym("C")], &weights, 2);
        assert_eq!(ranked, vec![sym("A"), sym("B")]);
    }
}
