//! Table definitions and composite keys.
//!
//! Every table maps a string key to a JSON value. Composite keys join their
//! parts with `:` and render dates as ISO `YYYY-MM-DD`, so lexicographic key
//! order is chronological within a prefix and "latest on or before" is a
//! reverse range scan. Parts are escaped (`%` as `%25`, `:` as `%3A`), so an
//! id containing the separator can never fall inside another id's prefix.

use std::borrow::Cow;

use chrono::NaiveDate;
use redb::TableDefinition;

use riskline_traits::analytics::{BenchmarkKind, BetaSubject};
use riskline_traits::{BatchRunId, CalculationId, FactorId, PortfolioId, PositionId, Symbol};

pub(crate) type Table = TableDefinition<'static, &'static str, &'static [u8]>;

// Reference data
pub(crate) const PORTFOLIOS: Table = TableDefinition::new("portfolios");
pub(crate) const POSITIONS: Table = TableDefinition::new("positions");
pub(crate) const FACTORS: Table = TableDefinition::new("factors");
pub(crate) const PRICES: Table = TableDefinition::new("prices");

// Calculation results
pub(crate) const SNAPSHOTS: Table = TableDefinition::new("exposure_snapshots");
pub(crate) const REGRESSIONS: Table = TableDefinition::new("regressions");
pub(crate) const FACTOR_BETAS: Table = TableDefinition::new("factor_betas");
pub(crate) const CORRELATIONS: Table = TableDefinition::new("correlations");
pub(crate) const PAIRS: Table = TableDefinition::new("correlation_pairs");

// Batch bookkeeping
pub(crate) const BATCH_RUNS: Table = TableDefinition::new("batch_runs");
pub(crate) const JOB_RESULTS: Table = TableDefinition::new("job_results");

pub(crate) const ALL_TABLES: [Table; 11] = [
    PORTFOLIOS,
    POSITIONS,
    FACTORS,
    PRICES,
    SNAPSHOTS,
    REGRESSIONS,
    FACTOR_BETAS,
    CORRELATIONS,
    PAIRS,
    BATCH_RUNS,
    JOB_RESULTS,
];

const SEP: char = ':';

fn escape(part: &str) -> Cow<'_, str> {
    if part.contains(|c| c == '%' || c == SEP) {
        Cow::Owned(part.replace('%', "%25").replace(SEP, "%3A"))
    } else {
        Cow::Borrowed(part)
    }
}

fn compose(parts: &[&str]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(SEP);
        }
        key.push_str(&escape(part));
    }
    key
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Inclusive bounds covering every key that extends the composed `prefix`.
pub(crate) fn prefix_bounds(prefix: &str) -> (String, String) {
    (format!("{prefix}{SEP}"), format!("{prefix}{SEP}{}", char::MAX))
}

/// Inclusive bounds for `prefix:<date>[:...]` keys with dates up to `on_or_before`.
pub(crate) fn through_date(prefix: &str, on_or_before: NaiveDate) -> (String, String) {
    (
        format!("{prefix}{SEP}"),
        format!("{prefix}{SEP}{}{SEP}{}", iso(on_or_before), char::MAX),
    )
}

pub(crate) fn portfolio_prefix(portfolio_id: &PortfolioId) -> String {
    compose(&[portfolio_id.as_str()])
}

pub(crate) fn symbol_prefix(symbol: &Symbol) -> String {
    compose(&[symbol.as_str()])
}

pub(crate) fn calculation_prefix(calculation_id: &CalculationId) -> String {
    compose(&[&calculation_id.to_string()])
}

pub(crate) fn batch_run_prefix(batch_run_id: &BatchRunId) -> String {
    compose(&[&batch_run_id.to_string()])
}

pub(crate) fn position(portfolio_id: &PortfolioId, id: &PositionId) -> String {
    compose(&[portfolio_id.as_str(), id.as_str()])
}

pub(crate) fn price(symbol: &Symbol, date: NaiveDate) -> String {
    compose(&[symbol.as_str(), &iso(date)])
}

pub(crate) fn snapshot(portfolio_id: &PortfolioId, date: NaiveDate) -> String {
    compose(&[portfolio_id.as_str(), &iso(date)])
}

pub(crate) fn regression_prefix(
    portfolio_id: &PortfolioId,
    benchmark: BenchmarkKind,
    date: NaiveDate,
) -> String {
    compose(&[portfolio_id.as_str(), benchmark.as_str(), &iso(date)])
}

pub(crate) fn regression(
    portfolio_id: &PortfolioId,
    benchmark: BenchmarkKind,
    date: NaiveDate,
    subject: &BetaSubject,
) -> String {
    compose(&[
        portfolio_id.as_str(),
        benchmark.as_str(),
        &iso(date),
        &subject.key(),
    ])
}

pub(crate) fn factor_beta_prefix(portfolio_id: &PortfolioId, date: NaiveDate) -> String {
    compose(&[portfolio_id.as_str(), &iso(date)])
}

pub(crate) fn factor_beta(
    portfolio_id: &PortfolioId,
    date: NaiveDate,
    factor_id: &FactorId,
    subject: &BetaSubject,
) -> String {
    compose(&[
        portfolio_id.as_str(),
        &iso(date),
        factor_id.as_str(),
        &subject.key(),
    ])
}

/// Lookback is zero-padded so one portfolio's windows sort numerically.
pub(crate) fn correlation_prefix(portfolio_id: &PortfolioId, lookback_days: u32) -> String {
    compose(&[portfolio_id.as_str(), &format!("{lookback_days:05}")])
}

pub(crate) fn correlation(portfolio_id: &PortfolioId, lookback_days: u32, date: NaiveDate) -> String {
    compose(&[
        portfolio_id.as_str(),
        &format!("{lookback_days:05}"),
        &iso(date),
    ])
}

pub(crate) fn pair(calculation_id: &CalculationId, a: &Symbol, b: &Symbol) -> String {
    compose(&[&calculation_id.to_string(), a.as_str(), b.as_str()])
}

pub(crate) fn job_result(batch_run_id: &BatchRunId, job_name: &str, portfolio_id: &PortfolioId) -> String {
    compose(&[&batch_run_id.to_string(), job_name, portfolio_id.as_str()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_dates_sort_chronologically() {
        let pf = PortfolioId::new("PF");
        let earlier = snapshot(&pf, d(2024, 2, 9));
        let later = snapshot(&pf, d(2024, 11, 1));
        assert!(earlier < later);
        assert_eq!(earlier, "PF:2024-02-09");
    }

    #[test]
    fn test_prefix_excludes_longer_ids() {
        let (lower, upper) = prefix_bounds(&portfolio_prefix(&PortfolioId::new("A")));
        let own = position(&PortfolioId::new("A"), &PositionId::new("P1"));
        let other = position(&PortfolioId::new("AB"), &PositionId::new("P1"));
        assert!(lower.as_str() <= own.as_str() && own.as_str() <= upper.as_str());
        assert!(!(lower.as_str() <= other.as_str() && other.as_str() <= upper.as_str()));
    }

    #[test]
    fn test_separator_in_id_is_escaped() {
        let pf = PortfolioId::new("PF");
        let nested = PortfolioId::new("PF:2");
        let (lower, upper) = prefix_bounds(&portfolio_prefix(&pf));
        let other = position(&nested, &PositionId::new("B1"));
        assert_eq!(other, "PF%3A2:B1");
        assert!(!(lower <= other && other <= upper));

        let (lower, upper) = through_date(&portfolio_prefix(&pf), d(2024, 6, 28));
        let other = snapshot(&nested, d(2024, 6, 1));
        assert!(!(lower <= other && other <= upper));

        assert_eq!(portfolio_prefix(&PortfolioId::new("50%")), "50%25");
    }

    #[test]
    fn test_through_date_bounds() {
        let pf = PortfolioId::new("PF");
        let (lower, upper) = through_date(&portfolio_prefix(&pf), d(2024, 6, 28));
        let inside = snapshot(&pf, d(2024, 6, 28));
        let outside = snapshot(&pf, d(2024, 6, 29));
        let suffixed = factor_beta(&pf, d(2024, 6, 28), &FactorId::new("MKT"), &BetaSubject::Portfolio);
        assert!(lower <= inside && inside <= upper);
        assert!(lower <= suffixed && suffixed <= upper);
        assert!(outside > upper);
    }

    #[test]
    fn test_lookback_padding() {
        let pf = PortfolioId::new("PF");
        assert!(correlation_prefix(&pf, 30) < correlation_prefix(&pf, 252));
    }
}
