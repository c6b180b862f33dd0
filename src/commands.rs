//! Implementation of resubmit CLI commands.

use std::io::Write;

use anyhow::anyhow;
use clap::Args;
use colored::Colorize;
use resubmit_engine::Controller;
use resubmit_engine::LifecycleEvent;
use resubmit_engine::LifecycleState;
use resubmit_engine::Outcome;
use resubmit_engine::config::Config as EngineConfig;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub mod call;
pub mod config;
pub mod render;
pub mod run;

/// The capacity of the lifecycle event channel.
const EVENTS_CAPACITY: usize = 100;

/// An error from a command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The command could not do its work.
    #[error(transparent)]
    Single(#[from] anyhow::Error),
    /// The command ran, but no job completed successfully.
    #[error("{0}")]
    Unsuccessful(String),
}

impl CommandError {
    /// The process exit code for the error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Single(_) => 1,
            Self::Unsuccessful(_) => 2,
        }
    }
}

/// The result type of commands.
pub type CommandResult<T> = Result<T, CommandError>;

/// Parses a `KEY=VALUE` command line argument.
pub fn parse_key_value(s: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected `KEY=VALUE`, found `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("missing key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Arguments shared by the commands that submit jobs.
#[derive(Args, Debug, Clone, Default)]
pub struct JobArgs {
    /// A `#SBATCH` directive to set on the job, overriding configured
    /// directives of the same name.
    #[clap(short = 'd', long = "directive", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub directives: Vec<(String, String)>,

    /// The number of times to submit a job that does not complete.
    #[clap(long, value_name = "COUNT")]
    pub max_retries: Option<u64>,

    /// The number of seconds between queue polls.
    #[clap(long, value_name = "SECONDS")]
    pub poll_interval: Option<u64>,

    /// The file name pattern of the job log, relative to the save directory.
    #[clap(long, value_name = "PATTERN")]
    pub log_file_name: Option<String>,
}

impl JobArgs {
    /// Applies the CLI arguments to the given engine configuration.
    pub fn apply_engine_config(&self, config: &mut EngineConfig) {
        if let Some(max_retries) = self.max_retries {
            config.controller.max_retries = max_retries;
        }

        if let Some(poll_interval) = self.poll_interval {
            config.controller.poll_interval = poll_interval;
        }

        if let Some(log_file_name) = &self.log_file_name {
            config.controller.log_file_name = log_file_name.clone();
        }

        for (key, value) in &self.directives {
            config.directives.insert(key.clone(), value);
        }
    }
}

/// Creates a controller for the engine configuration and starts printing its
/// lifecycle events to stderr.
///
/// The returned task ends once the controller is dropped.
pub(crate) fn controller_with_progress(
    config: &EngineConfig,
    colorize: bool,
) -> (Controller, JoinHandle<()>) {
    let (tx, rx) = broadcast::channel(EVENTS_CAPACITY);
    let controller =
        Controller::new(config.create_gateway(), &config.controller).with_events(tx);
    let max_retries = controller.max_retries();

    let progress = tokio::spawn(print_progress(
        rx,
        std::io::stderr(),
        max_retries,
        colorize,
    ));

    (controller, progress)
}

/// Writes a progress line for each lifecycle event until the channel closes.
///
/// Stops early if the writer fails.
async fn print_progress<W: Write>(
    mut rx: broadcast::Receiver<LifecycleEvent>,
    mut out: W,
    max_retries: u64,
    colorize: bool,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = progress_line(&event, max_retries, colorize) {
                    if let Err(e) = writeln!(out, "{line}") {
                        tracing::warn!("stopped printing progress: {e}");
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("skipped {skipped} lifecycle events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Formats the progress line for a lifecycle event, if the event is worth
/// reporting.
fn progress_line(event: &LifecycleEvent, max_retries: u64, colorize: bool) -> Option<String> {
    // The attempt counter has already advanced past a job that ended.
    let attempt = match event.state {
        LifecycleState::Retrying | LifecycleState::Exhausted => event.run.attempt,
        _ => event.run.attempt + 1,
    };
    let attempt = format!("[{attempt}/{max_retries}]");
    let job = event
        .run
        .job
        .as_ref()
        .map(|j| j.to_string())
        .unwrap_or_default();
    let status = event
        .run
        .status
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown status".to_string());

    let (label, message) = match event.state {
        LifecycleState::Submitted => ("submitted", format!("job {job}")),
        LifecycleState::Succeeded => ("completed", format!("job {job} ({status})")),
        LifecycleState::Retrying => ("retrying", format!("job {job} ended with {status}")),
        LifecycleState::Exhausted => ("exhausted", format!("job {job} ended with {status}")),
        LifecycleState::SubmissionFailed => {
            ("rejected", "the scheduler did not accept the script".to_string())
        }
        LifecycleState::Idle
        | LifecycleState::Submitting
        | LifecycleState::Polling
        | LifecycleState::Classifying => return None,
    };

    let label = if colorize {
        match event.state {
            LifecycleState::Succeeded => label.green().bold(),
            LifecycleState::Submitted => label.cyan().bold(),
            LifecycleState::Retrying => label.yellow().bold(),
            _ => label.red().bold(),
        }
    } else {
        label.normal()
    };

    Some(format!("{attempt} {label}: {message}"))
}

/// Prints the outcome as JSON and fails unless a job completed.
pub(crate) fn report_outcome(outcome: &Outcome) -> CommandResult<()> {
    let json = serde_json::to_string_pretty(outcome)
        .map_err(|e| anyhow!("failed to serialize outcome: {e}"))?;
    println!("{json}");

    match outcome {
        Outcome::Succeeded { .. } => Ok(()),
        Outcome::SubmissionFailed { attempts } => Err(CommandError::Unsuccessful(format!(
            "the scheduler rejected the script after {attempts} submission{s}",
            s = if *attempts == 1 { "" } else { "s" }
        ))),
        Outcome::Exhausted {
            last_status,
            attempts,
        } => Err(CommandError::Unsuccessful(format!(
            "no job completed after {attempts} submission{s} (last status: {status})",
            s = if *attempts == 1 { "" } else { "s" },
            status = last_status
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ))),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use resubmit_engine::JobId;
    use resubmit_engine::JobStatus;
    use resubmit_engine::controller::JobRun;

    use super::*;

    fn event(state: LifecycleState, attempt: u64) -> LifecycleEvent {
        LifecycleEvent {
            state,
            run: JobRun {
                attempt,
                job: Some(JobId::new("77")),
                status: Some(JobStatus::new("TIMEOUT")),
            },
        }
    }

    #[test]
    fn parses_key_values() {
        assert_eq!(
            parse_key_value("gpu=2").unwrap(),
            ("gpu".to_string(), "2".to_string())
        );
        assert_eq!(
            parse_key_value("comment=a=b").unwrap(),
            ("comment".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_value("flag=").unwrap(),
            ("flag".to_string(), String::new())
        );
        assert!(parse_key_value("gpu").is_err());
        assert!(parse_key_value("=2").is_err());
    }

    #[test]
    fn applies_job_args() {
        let mut config = EngineConfig::default();
        config.directives.insert("partition", "cpu");
        config.directives.insert("time", "01:00:00");

        JobArgs {
            directives: vec![("partition".to_string(), "gpu".to_string())],
            max_retries: Some(5),
            poll_interval: None,
            log_file_name: Some("job.log".to_string()),
        }
        .apply_engine_config(&mut config);

        assert_eq!(config.controller.max_retries, 5);
        assert_eq!(config.controller.poll_interval, 10);
        assert_eq!(config.controller.log_file_name, "job.log");
        assert_eq!(
            config.directives.lines(),
            ["#SBATCH --partition=gpu", "#SBATCH --time=01:00:00"]
        );
    }

    #[test]
    fn formats_progress() {
        assert_eq!(
            progress_line(&event(LifecycleState::Retrying, 1), 3, false).unwrap(),
            "[1/3] retrying: job 77 ended with TIMEOUT"
        );
        assert_eq!(
            progress_line(&event(LifecycleState::Submitted, 2), 3, false).unwrap(),
            "[3/3] submitted: job 77"
        );
        assert_eq!(
            progress_line(&event(LifecycleState::Exhausted, 3), 3, false).unwrap(),
            "[3/3] exhausted: job 77 ended with TIMEOUT"
        );
        assert_eq!(progress_line(&event(LifecycleState::Polling, 0), 3, false), None);
    }

    /// A writer whose every write fails.
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn prints_progress_until_channel_closes() {
        let (tx, rx) = broadcast::channel(8);
        tx.send(event(LifecycleState::Polling, 0)).unwrap();
        tx.send(event(LifecycleState::Submitted, 0)).unwrap();
        tx.send(event(LifecycleState::Retrying, 1)).unwrap();
        drop(tx);

        let mut out = Vec::new();
        print_progress(rx, &mut out, 3, false).await;
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[1/3] submitted: job 77\n[1/3] retrying: job 77 ended with TIMEOUT\n"
        );
    }

    #[tokio::test]
    async fn progress_stops_when_writes_fail() {
        let (tx, rx) = broadcast::channel(8);
        tx.send(event(LifecycleState::Submitted, 0)).unwrap();

        // The sender stays open, so only the write failure ends the loop.
        print_progress(rx, BrokenPipe, 3, false).await;
        assert!(tx.send(event(LifecycleState::Succeeded, 0)).is_err());
    }

    #[test]
    fn unsuccessful_outcomes_fail() {
        assert!(
            report_outcome(&Outcome::Succeeded {
                job: JobId::new("1"),
                status: JobStatus::new("COMPLETED"),
                attempts: 1,
            })
            .is_ok()
        );

        let err = report_outcome(&Outcome::Exhausted {
            last_status: None,
            attempts: 3,
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(
            err.to_string(),
            "no job completed after 3 submissions (last status: unknown)"
        );

        let err = report_outcome(&Outcome::SubmissionFailed { attempts: 1 }).unwrap_err();
        assert_eq!(
            err.to_string(),
            "the scheduler rejected the script after 1 submission"
        );
    }
}
