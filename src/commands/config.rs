//! Implementation of the `config` command.

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;

use crate::Config;
use crate::commands::CommandResult;

/// Arguments for the `config` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// The configuration action.
    #[command(subcommand)]
    command: ConfigSubcommand,
}

/// Subcommands for the `config` command.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Generates a default configuration file.
    Init,

    /// Displays the current configuration, after every layer is applied.
    Resolve,
}

/// Runs the `config` command.
pub fn config(args: Args, config: Config) -> CommandResult<()> {
    let config = match args.command {
        ConfigSubcommand::Init => Config::default(),
        ConfigSubcommand::Resolve => config,
    };

    let text = toml::to_string_pretty(&config).context("failed to serialize configuration")?;
    print!("{text}");
    Ok(())
}
