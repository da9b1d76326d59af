//! Load command implementation.
//!
//! Seeds the store with reference and market data from a JSON fixture.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use riskline_ext_redb::{FixtureFile, LoadSummary};

use crate::cli::OutputFormat;
use crate::commands::Context;
use crate::output::{print_header, print_json, print_output, print_success, KeyValue};

/// Arguments for the load command.
#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Fixture file (JSON with portfolios, positions, factors and prices)
    pub file: PathBuf,
}

/// Execute the load command.
pub fn execute(args: LoadArgs, ctx: &Context) -> Result<()> {
    let fixture = FixtureFile::from_path(&args.file)?;
    let store = ctx.open_store()?;
    let summary = store.load_fixture(&fixture)?;

    match ctx.format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => {
            print_header("Loaded");
            print_output(&summary_rows(&summary), ctx.format)?;
            if !ctx.quiet {
                print_success(&format!(
                    "Loaded {} into {}",
                    args.file.display(),
                    ctx.config.storage_path.display()
                ));
            }
            Ok(())
        }
    }
}

fn summary_rows(summary: &LoadSummary) -> Vec<KeyValue> {
    vec![
        KeyValue::new("Portfolios", summary.portfolios.to_string()),
        KeyValue::new("Positions", summary.positions.to_string()),
        KeyValue::new("Factors", summary.factors.to_string()),
        KeyValue::new("Prices", summary.prices.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliConfig;
    use std::io::Write;

    #[test]
    fn test_load_fixture_file() {
        let dir = tempfile::tempdir().unwrap();
        let fixture_path = dir.path().join("fixture.json");
        let mut file = std::fs::File::create(&fixture_path).unwrap();
        write!(
            file,
            r#"{{
                "portfolios": [{{"id": "ALPHA", "name": "Alpha", "equity_balance": 50000, "current_value": null}}],
                "prices": [{{"symbol": "SPY", "date": "2024-06-28", "close": 545.1}}]
            }}"#
        )
        .unwrap();

        let ctx = Context {
            config: CliConfig {
                storage_path: dir.path().join("risk.redb"),
                ..CliConfig::default()
            },
            format: OutputFormat::Json,
            quiet: true,
        };
        execute(LoadArgs { file: fixture_path }, &ctx).unwrap();

        let counts = ctx.open_store().unwrap().table_counts().unwrap();
        assert_eq!(counts["portfolios"], 1);
        assert_eq!(counts["prices"], 1);
    }
}
