//! Implementation of the `render` command.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use resubmit_engine::ExtraArgs;
use resubmit_engine::ScriptTemplate;

use crate::Config;
use crate::commands::CommandResult;
use crate::commands::parse_key_value;

/// Arguments for the `render` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The job script template to render.
    #[clap(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// A `#SBATCH` directive to set, overriding configured directives of the
    /// same name.
    #[clap(short = 'd', long = "directive", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub directives: Vec<(String, String)>,

    /// An extra `--KEY VALUE` argument appended to the script's final command.
    #[clap(short = 'a', long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub args: Vec<(String, String)>,
}

/// The main function for the `render` subcommand.
///
/// Prints the script that would be submitted, without the `output` directive
/// a run adds.
pub async fn render(args: Args, config: Config) -> CommandResult<()> {
    let template = ScriptTemplate::read(&args.script)
        .await
        .with_context(|| {
            format!(
                "failed to read job script `{script}`",
                script = args.script.display()
            )
        })?;

    let mut directives = config.engine.directives;
    for (key, value) in &args.directives {
        directives.insert(key.clone(), value);
    }
    let extra_args: ExtraArgs = args.args.iter().cloned().collect();

    let script = template
        .render(&directives, Some(&extra_args))
        .context("failed to render job script")?;
    print!("{script}");
    Ok(())
}
