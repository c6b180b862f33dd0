//! Implementation of the `call` command.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use resubmit_engine::FunctionCall;

use crate::Config;
use crate::commands::CommandResult;
use crate::commands::JobArgs;
use crate::commands::controller_with_progress;
use crate::commands::parse_key_value;
use crate::commands::report_outcome;

/// Arguments for the `call` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The module to import the function from.
    #[clap(value_name = "MODULE")]
    pub module: String,

    /// The function to call.
    #[clap(value_name = "FUNCTION")]
    pub function: String,

    /// The directory the synthesized script and job log are written to.
    #[clap(short, long, value_name = "DIR")]
    pub save_dir: PathBuf,

    /// A positional argument, as literal source text (strings need their own
    /// quotes).
    #[clap(long = "arg", value_name = "LITERAL")]
    pub args: Vec<String>,

    /// A keyword argument, with the value as literal source text.
    #[clap(long = "kwarg", value_name = "NAME=LITERAL", value_parser = parse_key_value)]
    pub kwargs: Vec<(String, String)>,

    /// A directory to put at the front of the import search path.
    #[clap(long, value_name = "DIR")]
    pub search_path: Option<PathBuf>,

    /// The interpreter that runs the call.
    #[clap(long, value_name = "PATH")]
    pub interpreter: Option<PathBuf>,

    /// Job submission arguments.
    #[command(flatten)]
    pub job: JobArgs,
}

impl Args {
    /// Builds the function call described by the arguments.
    fn function_call(&self) -> FunctionCall {
        let mut call = FunctionCall::new(&self.module, &self.function);
        for arg in &self.args {
            call = call.arg(arg);
        }
        for (name, value) in &self.kwargs {
            call = call.kwarg(name, value);
        }
        if let Some(path) = &self.search_path {
            call = call.search_path(path);
        }
        call
    }
}

/// The main function for the `call` subcommand.
pub async fn call(args: Args, mut config: Config, colorize: bool) -> CommandResult<()> {
    args.job.apply_engine_config(&mut config.engine);
    if let Some(interpreter) = &args.interpreter {
        config.engine.call.interpreter = interpreter.clone();
    }
    config
        .engine
        .validate()
        .context("invalid job submission arguments")?;

    let call = args.function_call();
    let (controller, progress) = controller_with_progress(&config.engine, colorize);
    let outcome = call
        .run(
            &controller,
            &config.engine.call.interpreter,
            &args.save_dir,
            config.engine.directives.clone(),
        )
        .await
        .with_context(|| format!("failed to run `{expr}`", expr = call.expression()));
    drop(controller);
    let _ = progress.await;

    report_outcome(&outcome?)
}
