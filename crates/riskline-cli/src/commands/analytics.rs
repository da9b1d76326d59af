//! Analytics read commands: exposures, correlation, diversification, factors, betas.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;
use tabled::Tabled;

use riskline_engine::{
    AnalyticsService, BenchmarkBetasView, CorrelationMatrix, CorrelationQuery,
    DiversificationScore, FactorExposureView, PortfolioExposures,
};
use riskline_traits::analytics::RegressionResult;
use riskline_traits::PortfolioId;

use crate::commands::{parse_date_or_today, Context};
use crate::output::{
    format_amount, format_coefficient, print_availability, print_header, print_output,
    print_warning, KeyValue,
};

/// Arguments shared by the single-portfolio reads.
#[derive(Args, Debug)]
pub struct AnalyticsArgs {
    /// Portfolio id
    pub portfolio: String,

    /// As-of date (YYYY-MM-DD). Defaults to today.
    #[arg(short, long)]
    pub date: Option<String>,
}

/// Arguments for the correlation and diversification reads.
#[derive(Args, Debug)]
pub struct CorrelationArgs {
    #[command(flatten)]
    pub common: AnalyticsArgs,

    /// Lookback window in days
    #[arg(long)]
    pub lookback_days: Option<u32>,

    /// Minimum overlapping observations per pair
    #[arg(long)]
    pub min_overlap: Option<usize>,

    /// Maximum symbols in the matrix
    #[arg(long)]
    pub max_symbols: Option<usize>,
}

impl CorrelationArgs {
    /// Query overrides; unset fields use the configured defaults.
    pub fn query(&self) -> CorrelationQuery {
        CorrelationQuery {
            lookback_days: self.lookback_days,
            min_overlap: self.min_overlap,
            max_symbols: self.max_symbols,
        }
    }
}

/// Arguments for the benchmark beta read.
#[derive(Args, Debug)]
pub struct BetasArgs {
    /// Portfolio id
    pub portfolio: String,

    /// Calculation date (YYYY-MM-DD). Defaults to today.
    #[arg(short, long)]
    pub date: Option<String>,
}

/// Execute the exposures command.
pub async fn exposures(args: AnalyticsArgs, ctx: &Context) -> Result<()> {
    let as_of = parse_date_or_today(args.date.as_deref())?;
    let (_store, engine) = ctx.open_engine()?;
    let result = engine
        .get_portfolio_exposures(&PortfolioId::new(args.portfolio), as_of)
        .await?;

    print_availability(&result, ctx.format, |exposures| {
        print_header(&format!("Exposures: {}", exposures.snapshot.portfolio_id));
        print_output(&exposure_rows(exposures), ctx.format)
    })
}

/// Execute the correlation command.
pub async fn correlation(args: CorrelationArgs, ctx: &Context) -> Result<()> {
    let as_of = parse_date_or_today(args.common.date.as_deref())?;
    let (_store, engine) = ctx.open_engine()?;
    let portfolio_id = PortfolioId::new(args.common.portfolio.clone());
    let result = engine
        .get_correlation_matrix(&portfolio_id, as_of, args.query())
        .await?;

    print_availability(&result, ctx.format, |matrix| {
        print_header(&format!(
            "Correlations: {} ({} days, calculated {})",
            portfolio_id, matrix.lookback_days, matrix.calculation_date
        ));
        if matrix.stale {
            print_warning("Correlation calculation is stale");
        }
        println!("{}", render_matrix(matrix));
        Ok(())
    })
}

/// Execute the diversification command.
pub async fn diversification(args: CorrelationArgs, ctx: &Context) -> Result<()> {
    let as_of = parse_date_or_today(args.common.date.as_deref())?;
    let (_store, engine) = ctx.open_engine()?;
    let portfolio_id = PortfolioId::new(args.common.portfolio.clone());
    let result = engine
        .get_diversification_score(&portfolio_id, as_of, args.query())
        .await?;

    print_availability(&result, ctx.format, |score| {
        print_header(&format!("Diversification: {}", portfolio_id));
        if score.stale {
            print_warning("Correlation calculation is stale");
        }
        print_output(&score_rows(score), ctx.format)
    })
}

#[derive(Debug, Serialize, Tabled)]
struct FactorRow {
    #[tabled(rename = "Factor")]
    name: String,
    #[tabled(rename = "Proxy")]
    proxy: String,
    #[tabled(rename = "Beta")]
    beta: String,
    #[tabled(rename = "Dollar Exposure")]
    dollar_exposure: String,
    #[tabled(rename = "R²")]
    r_squared: String,
    #[tabled(rename = "Obs")]
    observations: usize,
    #[tabled(rename = "Quality")]
    quality: String,
}

/// Execute the factors command.
pub async fn factors(args: AnalyticsArgs, ctx: &Context) -> Result<()> {
    let as_of = parse_date_or_today(args.date.as_deref())?;
    let (_store, engine) = ctx.open_engine()?;
    let portfolio_id = PortfolioId::new(args.portfolio);
    let result = engine.get_factor_exposures(&portfolio_id, as_of).await?;

    print_availability(&result, ctx.format, |view| {
        print_header(&format!(
            "Factor Exposures: {} (as of {})",
            portfolio_id, view.calculation_date
        ));
        if view.stale {
            print_warning("Factor exposures are stale");
        }
        print_output(&factor_rows(view), ctx.format)
    })
}

#[derive(Debug, Serialize, Tabled)]
struct BetaRow {
    #[tabled(rename = "Benchmark")]
    benchmark: String,
    #[tabled(rename = "Beta")]
    beta: String,
    #[tabled(rename = "Raw Beta")]
    raw_beta: String,
    #[tabled(rename = "R²")]
    r_squared: String,
    #[tabled(rename = "p-value")]
    p_value: String,
    #[tabled(rename = "Obs")]
    observations: usize,
    #[tabled(rename = "Significance")]
    significance: String,
}

impl BetaRow {
    fn new(label: &str, row: &RegressionResult) -> Self {
        Self {
            benchmark: label.to_string(),
            beta: format_coefficient(row.beta),
            raw_beta: format_coefficient(row.raw_beta),
            r_squared: format_coefficient(row.r_squared),
            p_value: format_coefficient(row.p_value),
            observations: row.n_observations,
            significance: format!("{:?}", row.significance),
        }
    }
}

/// Execute the betas command.
pub async fn betas(args: BetasArgs, ctx: &Context) -> Result<()> {
    let date = parse_date_or_today(args.date.as_deref())?;
    let (_store, engine) = ctx.open_engine()?;
    let portfolio_id = PortfolioId::new(args.portfolio);
    let result = engine.get_benchmark_betas(&portfolio_id, date).await?;

    print_availability(&result, ctx.format, |view| {
        print_header(&format!("Benchmark Betas: {} ({})", portfolio_id, view.calculation_date));
        print_output(&beta_rows(view), ctx.format)
    })
}

fn exposure_rows(exposures: &PortfolioExposures) -> Vec<KeyValue> {
    let snapshot = &exposures.snapshot;
    vec![
        KeyValue::new("Date", snapshot.calculation_date.to_string()),
        KeyValue::from_amount("Net Exposure", snapshot.net_exposure),
        KeyValue::from_amount("Gross Exposure", snapshot.gross_exposure),
        KeyValue::from_amount("Long Exposure", snapshot.long_exposure),
        KeyValue::from_amount("Short Exposure", snapshot.short_exposure),
        KeyValue::new(
            "Positions",
            format!("{} ({} priced)", snapshot.position_count, snapshot.priced_positions),
        ),
        KeyValue::new("Source", format!("{:?}", exposures.source)),
    ]
}

fn score_rows(score: &DiversificationScore) -> Vec<KeyValue> {
    vec![
        KeyValue::new("Score", format_coefficient(score.score)),
        KeyValue::new("Symbols", score.symbol_count.to_string()),
        KeyValue::new("Pairs", score.pair_count.to_string()),
        KeyValue::new("Lookback", format!("{} days", score.lookback_days)),
        KeyValue::new("Calculated", score.calculation_date.to_string()),
    ]
}

fn factor_rows(view: &FactorExposureView) -> Vec<FactorRow> {
    view.factors
        .iter()
        .map(|entry| FactorRow {
            name: entry.name.clone(),
            proxy: entry.proxy_symbol.to_string(),
            beta: format_coefficient(entry.beta),
            dollar_exposure: format_amount(entry.dollar_exposure),
            r_squared: format_coefficient(entry.r_squared),
            observations: entry.n_observations,
            quality: format!("{:?}", entry.quality),
        })
        .collect()
}

fn beta_rows(view: &BenchmarkBetasView) -> Vec<BetaRow> {
    let mut rows = Vec::new();
    if let Some(market) = &view.market {
        rows.push(BetaRow::new("Market", market));
    }
    if let Some(rate) = &view.interest_rate {
        rows.push(BetaRow::new("Interest Rate", rate));
    }
    rows
}

/// Render the display matrix with symbols as row and column headers.
fn render_matrix(matrix: &CorrelationMatrix) -> String {
    let mut builder = Builder::default();

    let mut header = vec![String::new()];
    header.extend(matrix.symbols.iter().map(ToString::to_string));
    builder.push_record(header);

    for (symbol, row) in matrix.symbols.iter().zip(&matrix.matrix) {
        let mut record = vec![symbol.to_string()];
        record.extend(row.iter().map(|cell| match cell {
            Some(value) => format!("{:.2}", value),
            None => "-".to_string(),
        }));
        builder.push_record(record);
    }

    builder.build().with(Style::rounded()).to_string()
}
