//! Implementation of the `run` command.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use resubmit_engine::ExtraArgs;
use resubmit_engine::RunRequest;
use tracing::debug;

use crate::Config;
use crate::commands::CommandResult;
use crate::commands::JobArgs;
use crate::commands::controller_with_progress;
use crate::commands::parse_key_value;
use crate::commands::report_outcome;

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The job script template to submit.
    #[clap(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// The directory the materialized script and job log are written to.
    #[clap(short, long, value_name = "DIR")]
    pub save_dir: PathBuf,

    /// An extra `--KEY VALUE` argument appended to the script's final command.
    #[clap(short = 'a', long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub args: Vec<(String, String)>,

    /// Job submission arguments.
    #[command(flatten)]
    pub job: JobArgs,
}

/// The main function for the `run` subcommand.
pub async fn run(args: Args, mut config: Config, colorize: bool) -> CommandResult<()> {
    args.job.apply_engine_config(&mut config.engine);
    config
        .engine
        .validate()
        .context("invalid job submission arguments")?;

    let mut request = RunRequest::new(&args.script, &args.save_dir)
        .with_directives(config.engine.directives.clone());
    if !args.args.is_empty() {
        request = request.with_extra_args(args.args.iter().cloned().collect::<ExtraArgs>());
    }
    debug!(?request, "running job script");

    let (controller, progress) = controller_with_progress(&config.engine, colorize);
    let outcome = controller.run(&request).await.with_context(|| {
        format!(
            "failed to run job script `{script}`",
            script = args.script.display()
        )
    });
    drop(controller);
    let _ = progress.await;

    report_outcome(&outcome?)
}
