//! Config command implementation.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::cli::OutputFormat;
use crate::commands::Context;
use crate::config::{CliConfig, DEFAULT_CONFIG_FILE};
use crate::output::{print_json, print_success};

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Print the default configuration
    Default,

    /// Validate the resolved configuration
    Validate,
}

/// Execute the config command.
pub fn execute(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => render(&ctx.config, ctx.format),
        ConfigCommand::Default => render(&CliConfig::default(), ctx.format),
        ConfigCommand::Validate => {
            ctx.config.validate()?;
            if !ctx.quiet {
                print_success("Configuration is valid");
            }
            Ok(())
        }
    }
}

fn render(config: &CliConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(config),
        OutputFormat::Table => {
            println!("# {}", DEFAULT_CONFIG_FILE);
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
