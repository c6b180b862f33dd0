//! The Resubmit command line tool.

use std::io::IsTerminal;
use std::io::stderr;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap_verbosity_flag::Verbosity;
use colored::Colorize;
use resubmit::Config;
use resubmit::commands;
use resubmit::commands::CommandError;
use resubmit::commands::CommandResult;
use tracing_log::AsTrace;

#[derive(Subcommand)]
enum Commands {
    /// Submits a job script template and resubmits it until a job completes.
    ///
    /// The template's leading `#SBATCH` lines are replaced by the configured
    /// and given directives, and the job log is directed into the save
    /// directory. The outcome is printed as JSON.
    Run(commands::run::Args),

    /// Submits a script that calls a single function and resubmits it until a
    /// job completes.
    Call(commands::call::Args),

    /// Prints the script a template materializes to, without submitting it.
    Render(commands::render::Args),

    /// Displays or initializes the configuration file.
    Config(commands::config::Args),
}

#[derive(Parser)]
#[command(author, version, propagate_version = true, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// The configuration file to use instead of `resubmit.toml`.
    #[clap(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbose: Verbosity,
}

async fn inner() -> CommandResult<()> {
    let cli = Cli::parse();

    tracing_log::LogTracer::init().map_err(anyhow::Error::from)?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(cli.verbose.log_level_filter().as_trace())
        .with_writer(std::io::stderr)
        .with_ansi(stderr().is_terminal())
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(anyhow::Error::from)?;

    let config = Config::load(cli.config.as_deref())?;
    let colorize = config.common.color && stderr().is_terminal();

    match cli.command {
        Commands::Run(args) => commands::run::run(args, config, colorize).await,
        Commands::Call(args) => commands::call::call(args, config, colorize).await,
        Commands::Render(args) => commands::render::render(args, config).await,
        Commands::Config(args) => commands::config::config(args, config),
    }
}

#[tokio::main]
pub async fn main() {
    if let Err(e) = inner().await {
        let message = match &e {
            CommandError::Single(e) => format!("{e:?}"),
            CommandError::Unsuccessful(message) => message.clone(),
        };
        eprintln!(
            "{error}: {message}",
            error = if std::io::stderr().is_terminal() {
                "error".red().bold()
            } else {
                "error".normal()
            }
        );
        std::process::exit(e.exit_code());
    }
}
