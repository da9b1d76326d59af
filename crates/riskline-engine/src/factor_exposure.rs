//! Factor exposure engine.
//!
//! For each active factor, every position's returns are regressed on the
//! factor proxy's returns over the lookback window. Position betas are
//! scaled by signed exposure into dollar exposures and aggregated to a
//! portfolio-level row per factor.
//!
//! A date's factor set is *complete* only when every active factor has a
//! portfolio-level row for it. "Latest" reads walk back through calculation
//! dates until they find a complete set and never serve a partial one.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use riskline_math::stats::align_returns;
use riskline_traits::analytics::{BetaSubject, DataQuality, FactorBeta};
use riskline_traits::portfolio::Portfolio;
use riskline_traits::reference_data::FactorDefinition;
use riskline_traits::storage::WriteOp;
use riskline_traits::{
    Availability, FactorId, PortfolioId, PositionId, Symbol, UnavailableReason,
};

use crate::cache::ExposureCache;
use crate::context::{window_start, EngineContext};
use crate::error::{EngineError, EngineResult};
use crate::jobs::JobScope;

// =============================================================================
// RESULT TYPES
// =============================================================================

/// A position left out of a factor regression, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPosition {
    /// Position
    pub position_id: PositionId,
    /// Return symbol that lacked data
    pub symbol: Symbol,
    /// Factor the regression was for
    pub factor_id: FactorId,
    /// Why it was skipped
    pub reason: String,
}

/// Result of a factor beta calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorExposureRun {
    /// Calculation date
    pub calculation_date: NaiveDate,
    /// Portfolio-level rows, in factor display order
    pub portfolio_betas: Vec<FactorBeta>,
    /// Position-level rows staged
    pub position_rows: usize,
    /// Position/factor combinations skipped
    pub skipped: Vec<SkippedPosition>,
    /// Active factors with no portfolio-level row
    pub missing_factors: Vec<FactorId>,
    /// Every active factor produced a portfolio-level row
    pub complete: bool,
}

impl FactorExposureRun {
    /// Data-quality note for the job result.
    pub fn detail(&self) -> Option<String> {
        let mut notes = Vec::new();
        if !self.skipped.is_empty() {
            notes.push(format!("{} position/factor regressions skipped", self.skipped.len()));
        }
        if !self.missing_factors.is_empty() {
            let ids: Vec<&str> = self.missing_factors.iter().map(FactorId::as_str).collect();
            notes.push(format!("incomplete factor set, missing: {}", ids.join(", ")));
        }
        (!notes.is_empty()).then(|| notes.join("; "))
    }
}

/// One factor of a portfolio's exposure read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorExposureEntry {
    /// Factor
    pub factor_id: FactorId,
    /// Factor display name
    pub name: String,
    /// Proxy symbol
    pub proxy_symbol: Symbol,
    /// Portfolio beta
    pub beta: f64,
    /// Beta-weighted dollar exposure
    pub dollar_exposure: Decimal,
    /// Observation-weighted R-squared across positions
    pub r_squared: f64,
    /// Minimum observations across positions
    pub n_observations: usize,
    /// Window quality
    pub quality: DataQuality,
    /// Positions skipped for this factor
    pub skipped_positions: usize,
}

/// Factor exposure read payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorExposureView {
    /// Most recent date with a complete factor set
    pub calculation_date: NaiveDate,
    /// One entry per active factor
    pub factors: Vec<FactorExposureEntry>,
    /// Older than the staleness threshold
    pub stale: bool,
}

// =============================================================================
// ENGINE
// =============================================================================

struct PositionFit {
    beta: f64,
    exposure: Decimal,
    dollar_exposure: Decimal,
    r_squared: f64,
    n_observations: usize,
}

/// Factor exposure engine.
pub struct FactorExposureEngine {
    ctx: Arc<EngineContext>,
    cache: Arc<ExposureCache>,
}

impl FactorExposureEngine {
    /// Create a new factor exposure engine.
    pub fn new(ctx: Arc<EngineContext>, cache: Arc<ExposureCache>) -> Self {
        Self { ctx, cache }
    }

    /// Compute and stage position- and portfolio-level factor betas.
    pub async fn calculate_factor_betas(
        &self,
        portfolio: &Portfolio,
        scope: &mut JobScope,
    ) -> EngineResult<FactorExposureRun> {
        let config = &self.ctx.config;
        let date = scope.calculation_date();

        let factors = self.ctx.sources.factors.list_active().await?;
        if factors.is_empty() {
            return Err(EngineError::InsufficientData("no active factors defined".into()));
        }

        let values = self.cache.position_values(&portfolio.id, date).await?;
        if values.is_empty() {
            return Err(EngineError::InsufficientData("portfolio has no open positions".into()));
        }

        let mut symbols: Vec<Symbol> = values
            .iter()
            .map(|v| v.position.return_symbol().clone())
            .chain(factors.iter().map(|f| f.proxy_symbol.clone()))
            .collect();
        symbols.sort();
        symbols.dedup();

        let series = self
            .ctx
            .return_series(&symbols, window_start(date, config.factors.lookback_days)?, date)
            .await?;

        let mut position_rows = Vec::new();
        let mut portfolio_betas = Vec::new();
        let mut skipped = Vec::new();
        let mut missing_factors = Vec::new();

        for factor in &factors {
            let Some(proxy) = series.get(&factor.proxy_symbol) else {
                warn!(
                    factor = %factor.id,
                    proxy = %factor.proxy_symbol,
                    "Factor proxy has no return data in window"
                );
                missing_factors.push(factor.id.clone());
                continue;
            };

            let mut fits = Vec::new();
            let mut factor_skips = 0usize;

            for value in &values {
                let position = &value.position;
                let symbol = position.return_symbol();

                let fit = match series.get(symbol) {
                    None => Err(EngineError::InsufficientData(format!(
                        "no return data for {symbol}"
                    ))),
                    Some(returns) => {
                        let (y, x) = align_returns(returns, proxy);
                        self.ctx
                            .regression
                            .run_single_factor_regression(
                                &y,
                                &x,
                                config.factors.beta_cap,
                                config.regression.confidence,
                            )
                            .map_err(EngineError::from)
                    }
                };

                match fit {
                    Ok(fit) => {
                        let dollar_exposure = scale(fit.beta, value.exposure)?;
                        position_rows.push(FactorBeta {
                            portfolio_id: portfolio.id.clone(),
                            subject: BetaSubject::Position(position.id.clone()),
                            factor_id: factor.id.clone(),
                            calculation_date: date,
                            beta: fit.beta,
                            dollar_exposure,
                            r_squared: fit.r_squared,
                            n_observations: fit.n_observations,
                            quality: self.classify(fit.n_observations),
                            skipped_positions: 0,
                        });
                        fits.push(PositionFit {
                            beta: fit.beta,
                            exposure: value.exposure,
                            dollar_exposure,
                            r_squared: fit.r_squared,
                            n_observations: fit.n_observations,
                        });
                    }
                    Err(err) => {
                        warn!(
                            portfolio = %portfolio.id,
                            position = %position.id,
                            factor = %factor.id,
                            error = %err,
                            "Skipping position for factor regression"
                        );
                        factor_skips += 1;
                        skipped.push(SkippedPosition {
                            position_id: position.id.clone(),
                            symbol: symbol.clone(),
                            factor_id: factor.id.clone(),
                            reason: err.to_string(),
                        });
                    }
                }
            }

            match self.aggregate(portfolio, factor, date, &fits, factor_skips)? {
                Some(row) => portfolio_betas.push(row),
                None => missing_factors.push(factor.id.clone()),
            }
        }

        if portfolio_betas.is_empty() {
            return Err(EngineError::InsufficientData(format!(
                "no factor could be estimated ({} position/factor regressions skipped)",
                skipped.len()
            )));
        }

        let complete = missing_factors.is_empty();
        debug!(
            portfolio = %portfolio.id,
            factors = portfolio_betas.len(),
            positions = position_rows.len(),
            skipped = skipped.len(),
            complete,
            "Factor betas calculated"
        );

        let position_count = position_rows.len();
        let mut rows = position_rows;
        rows.extend(portfolio_betas.iter().cloned());
        // Replaces the whole (portfolio, date) set, so rows for positions or
        // factors missing from this run do not survive a rerun.
        scope.stage(WriteOp::FactorBetas {
            portfolio_id: portfolio.id.clone(),
            calculation_date: date,
            rows,
        });

        Ok(FactorExposureRun {
            calculation_date: date,
            portfolio_betas,
            position_rows: position_count,
            skipped,
            missing_factors,
            complete,
        })
    }

    /// Portfolio-level row for one factor, `None` if no position was regressed.
    fn aggregate(
        &self,
        portfolio: &Portfolio,
        factor: &FactorDefinition,
        date: NaiveDate,
        fits: &[PositionFit],
        skipped_positions: usize,
    ) -> EngineResult<Option<FactorBeta>> {
        if fits.is_empty() {
            return Ok(None);
        }

        let dollar_exposure: Decimal = fits.iter().map(|f| f.dollar_exposure).sum();
        let gross: Decimal = fits.iter().map(|f| f.exposure.abs()).sum();
        let denominator = if portfolio.equity_balance > Decimal::ZERO {
            portfolio.equity_balance
        } else {
            gross
        };

        let beta = if denominator > Decimal::ZERO {
            (dollar_exposure / denominator).to_f64().unwrap_or(0.0)
        } else {
            // All regressed positions are flat: average the raw betas
            fits.iter().map(|f| f.beta).sum::<f64>() / fits.len() as f64
        };

        let total_obs: usize = fits.iter().map(|f| f.n_observations).sum();
        let r_squared = fits
            .iter()
            .map(|f| f.r_squared * f.n_observations as f64)
            .sum::<f64>()
            / total_obs as f64;
        let n_observations = fits.iter().map(|f| f.n_observations).min().unwrap_or(0);

        Ok(Some(FactorBeta {
            portfolio_id: portfolio.id.clone(),
            subject: BetaSubject::Portfolio,
            factor_id: factor.id.clone(),
            calculation_date: date,
            beta,
            dollar_exposure,
            r_squared,
            n_observations,
            quality: self.classify(n_observations),
            skipped_positions,
        }))
    }

    fn classify(&self, observations: usize) -> DataQuality {
        let factors = &self.ctx.config.factors;
        DataQuality::classify(observations, factors.limited_threshold, factors.full_threshold)
    }

    /// Most recent date on or before `as_of` whose portfolio-level rows cover
    /// every active factor, with those rows.
    pub async fn latest_complete(
        &self,
        portfolio_id: &PortfolioId,
        as_of: NaiveDate,
    ) -> EngineResult<Option<(NaiveDate, Vec<FactorBeta>)>> {
        let factors = self.ctx.sources.factors.list_active().await?;
        match self.find_complete(portfolio_id, &factors, as_of).await? {
            LatestSet::Complete(date, rows) => Ok(Some((date, rows))),
            LatestSet::Incomplete | LatestSet::Empty => Ok(None),
        }
    }

    async fn find_complete(
        &self,
        portfolio_id: &PortfolioId,
        factors: &[FactorDefinition],
        as_of: NaiveDate,
    ) -> EngineResult<LatestSet> {
        if factors.is_empty() {
            return Ok(LatestSet::Empty);
        }

        let gateway = &self.ctx.sources.gateway;
        let dates = gateway.factor_beta_dates(portfolio_id, as_of).await?;
        if dates.is_empty() {
            return Ok(LatestSet::Empty);
        }

        let required: HashSet<&FactorId> = factors.iter().map(|f| &f.id).collect();
        for date in dates {
            let rows: Vec<FactorBeta> = gateway
                .get_factor_betas(portfolio_id, date)
                .await?
                .into_iter()
                .filter(|r| r.subject == BetaSubject::Portfolio)
                .collect();
            let present: HashSet<&FactorId> = rows.iter().map(|r| &r.factor_id).collect();
            if required.is_subset(&present) {
                return Ok(LatestSet::Complete(date, rows));
            }
            debug!(portfolio = %portfolio_id, %date, "Skipping date with partial factor set");
        }

        Ok(LatestSet::Incomplete)
    }

    /// Portfolio factor exposures from the latest complete date.
    pub async fn get_factor_exposures(
        &self,
        portfolio_id: &PortfolioId,
        as_of: NaiveDate,
    ) -> EngineResult<Availability<FactorExposureView>> {
        self.ctx.portfolio(portfolio_id).await?;
        let factors = self.ctx.sources.factors.list_active().await?;

        let (date, rows) = match self.find_complete(portfolio_id, &factors, as_of).await? {
            LatestSet::Complete(date, rows) => (date, rows),
            LatestSet::Empty => {
                return Ok(Availability::unavailable(
                    UnavailableReason::NoCalculationAvailable,
                ))
            }
            LatestSet::Incomplete => {
                return Ok(Availability::unavailable_with(
                    UnavailableReason::IncompleteFactorSet,
                    "no calculation date covers every active factor",
                ))
            }
        };

        let by_factor: BTreeMap<&FactorId, &FactorBeta> =
            rows.iter().map(|r| (&r.factor_id, r)).collect();
        let entries = factors
            .iter()
            .filter_map(|f| {
                by_factor.get(&f.id).map(|row| FactorExposureEntry {
                    factor_id: f.id.clone(),
                    name: f.name.clone(),
                    proxy_symbol: f.proxy_symbol.clone(),
                    beta: row.beta,
                    dollar_exposure: row.dollar_exposure,
                    r_squared: row.r_squared,
                    n_observations: row.n_observations,
                    quality: row.quality,
                    skipped_positions: row.skipped_positions,
                })
            })
            .collect();

        Ok(Availability::Available(FactorExposureView {
            calculation_date: date,
            factors: entries,
            stale: (as_of - date).num_days() > self.ctx.config.factors.stale_after_days,
        }))
    }
}

enum LatestSet {
    Complete(NaiveDate, Vec<FactorBeta>),
    Incomplete,
    Empty,
}

/// `beta * exposure` in decimal, rounded to four places.
fn scale(beta: f64, exposure: Decimal) -> EngineResult<Decimal> {
    let beta = Decimal::from_f64(beta).ok_or_else(|| {
        EngineError::PermanentCalculation(format!("beta {beta} is not representable"))
    })?;
    Ok((beta * exposure).round_dp(4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_scale_rounds() {
        assert_eq!(scale(1.5, dec!(1000)).unwrap(), dec!(1500));
        assert_eq!(scale(-0.25, dec!(-400)).unwrap(), dec!(100));
        assert!(scale(f64::NAN, dec!(1)).is_err());
    }
}
