//! Riskline CLI - portfolio risk batch analytics from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Seed reference and market data
//! riskline load fixture.json
//!
//! # Run the daily batch
//! riskline run 2024-06-28
//!
//! # Inspect a run
//! riskline status 6f1c...   # or: riskline status --date 2024-06-28
//!
//! # Read analytics
//! riskline exposures ALPHA --date 2024-06-28
//! riskline correlation ALPHA --lookback-days 90
//! riskline factors ALPHA -f json
//! ```

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod commands;
mod config;
mod error;
mod output;

use cli::{Cli, Commands};
use commands::Context;
use config::CliConfig;

const DEFAULT_LOG_FILTER: &str = "info,riskline=debug";

fn init_tracing(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or(DEFAULT_LOG_FILTER)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(storage) = cli.storage {
        config.storage_path = storage;
    }

    let ctx = Context {
        config,
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, &ctx).await?,
        Commands::Status(args) => commands::status::execute(args, &ctx).await?,
        Commands::Exposures(args) => commands::analytics::exposures(args, &ctx).await?,
        Commands::Correlation(args) => commands::analytics::correlation(args, &ctx).await?,
        Commands::Diversification(args) => {
            commands::analytics::diversification(args, &ctx).await?
        }
        Commands::Factors(args) => commands::analytics::factors(args, &ctx).await?,
        Commands::Betas(args) => commands::analytics::betas(args, &ctx).await?,
        Commands::Load(args) => commands::load::execute(args, &ctx)?,
        Commands::Config(args) => commands::config::execute(args, &ctx)?,
    }

    Ok(())
}
