//! Descriptive statistics and return series helpers.

use std::collections::BTreeMap;

use chrono::NaiveDate;

/// Daily returns keyed by observation date.
pub type ReturnSeries = BTreeMap<NaiveDate, f64>;

/// Arithmetic mean. `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (n - 1 denominator). `None` below two values.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some(ss / (values.len() - 1) as f64)
}

/// Pearson correlation of two equal-length series, clamped to [-1, 1].
///
/// Returns `None` when the lengths differ, fewer than two observations are
/// supplied, a value is not finite, or either series is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return None;
    }
    if x.iter().all(|v| *v == x[0]) || y.iter().all(|v| *v == y[0]) {
        return None;
    }

    let mx = mean(x)?;
    let my = mean(y)?;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let denom = (sxx * syy).sqrt();
    if denom == 0.0 || !denom.is_finite() || !sxy.is_finite() {
        return None;
    }
    Some((sxy / denom).clamp(-1.0, 1.0))
}

/// Simple daily returns `close_t / close_{t-1} - 1` from date-ordered closes.
///
/// The input is sorted by date before differencing. A return is dropped when
/// the previous close is not strictly positive or either close is not finite;
/// the following return restarts from the next valid close.
pub fn simple_returns(closes: &[(NaiveDate, f64)]) -> ReturnSeries {
    let mut sorted: Vec<(NaiveDate, f64)> = closes.to_vec();
    sorted.sort_by_key(|(date, _)| *date);
    sorted.dedup_by_key(|(date, _)| *date);

    let mut returns = ReturnSeries::new();
    for window in sorted.windows(2) {
        let (_, prev) = window[0];
        let (date, close) = window[1];
        if prev > 0.0 && prev.is_finite() && close.is_finite() {
            returns.insert(date, close / prev - 1.0);
        }
    }
    returns
}

/// Intersect two return series on date.
///
/// Returns `(a_values, b_values)` in ascending date order, one entry per date
/// present in both series.
pub fn align_returns(a: &ReturnSeries, b: &ReturnSeries) -> (Vec<f64>, Vec<f64>) {
    let (small, large, swapped) = if a.len() <= b.len() {
        (a, b, false)
    } else {
        (b, a, true)
    };

    let mut xs = Vec::with_capacity(small.len());
    let mut ys = Vec::with_capacity(small.len());
    for (date, s) in small {
        if let Some(l) = large.get(date) {
            xs.push(*s);
            ys.push(*l);
        }
    }

    if swapped {
        (ys, xs)
    } else {
        (xs, ys)
    }
}
