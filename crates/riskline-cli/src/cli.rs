//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::commands::{
    AnalyticsArgs, BetasArgs, ConfigArgs, CorrelationArgs, LoadArgs, RunArgs, StatusArgs,
};

/// Riskline - portfolio risk batch analytics
#[derive(Parser)]
#[command(name = "riskline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the TOML configuration file
    #[arg(short, long, env = "RISKLINE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Override the storage path from the configuration file
    #[arg(long, env = "RISKLINE_STORAGE", global = true)]
    pub storage: Option<PathBuf>,

    /// Log filter, e.g. "info" or "riskline_engine=trace". RUST_LOG takes precedence.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the daily batch for a calculation date and wait for it
    Run(RunArgs),

    /// Show a batch run, or the runs recorded for a date
    Status(StatusArgs),

    /// Net and gross exposure for a portfolio
    Exposures(AnalyticsArgs),

    /// Display correlation matrix for a portfolio
    Correlation(CorrelationArgs),

    /// Weighted diversification score for a portfolio
    Diversification(CorrelationArgs),

    /// Factor exposures from the latest complete factor set
    Factors(AnalyticsArgs),

    /// Market and interest-rate betas for a portfolio
    Betas(BetasArgs),

    /// Load portfolios, positions, factors and prices from a JSON fixture
    Load(LoadArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "riskline",
            "run",
            "2024-06-28",
            "--portfolio",
            "ALPHA",
            "--portfolio",
            "BETA",
            "--force",
            "-f",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.date.as_deref(), Some("2024-06-28"));
                assert_eq!(args.portfolio, vec!["ALPHA", "BETA"]);
                assert!(args.force);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_correlation_overrides() {
        let cli = Cli::try_parse_from([
            "riskline",
            "correlation",
            "ALPHA",
            "--lookback-days",
            "60",
            "--min-overlap",
            "20",
        ])
        .unwrap();

        match cli.command {
            Commands::Correlation(args) => {
                let query = args.query();
                assert_eq!(query.lookback_days, Some(60));
                assert_eq!(query.min_overlap, Some(20));
                assert_eq!(query.max_symbols, None);
            }
            _ => panic!("expected correlation"),
        }
    }
}
