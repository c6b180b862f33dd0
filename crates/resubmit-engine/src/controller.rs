//! The job lifecycle controller.
//!
//! A run moves through the following states:
//!
//! ```text
//! Idle -> Submitting -> Submitted -> Polling -> Classifying -+-> Succeeded
//!             ^                                               |
//!             +------------------ Retrying <------------------+-> Exhausted
//! ```
//!
//! The script is materialized once, on leaving `Idle`, and the same file is
//! resubmitted on every attempt. A submission the scheduler rejects ends the
//! run immediately without consuming an attempt; only jobs that were accepted
//! and then terminated with a status other than `COMPLETED` are retried.
//!
//! Attempts are strictly sequential. The controller never cancels a job: a
//! previous attempt that is somehow still alive is left alone, and dropping
//! the future returned by [`Controller::run`] abandons the current job in the
//! scheduler.

use std::path::Path;
use std::path::PathBuf;
use std::path::absolute;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::DirectiveSet;
use crate::Error;
use crate::ExtraArgs;
use crate::JobId;
use crate::JobStatus;
use crate::Result;
use crate::SchedulerGateway;
use crate::config::ControllerConfig;
use crate::directive::OUTPUT_DIRECTIVE;
use crate::script::materialize;

/// A request to run a job script to completion.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// The template script.
    pub template: PathBuf,
    /// The directory that receives the materialized script and job logs.
    ///
    /// Concurrent runs must use distinct save directories.
    pub save_dir: PathBuf,
    /// The directives to inject. The `output` directive is always replaced.
    pub directives: DirectiveSet,
    /// Arguments appended to the template's final command.
    pub extra_args: Option<ExtraArgs>,
}

impl RunRequest {
    /// Creates a request with no directives or extra arguments.
    pub fn new(template: impl Into<PathBuf>, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            save_dir: save_dir.into(),
            directives: DirectiveSet::new(),
            extra_args: None,
        }
    }

    /// Sets the directives.
    pub fn with_directives(mut self, directives: DirectiveSet) -> Self {
        self.directives = directives;
        self
    }

    /// Sets the extra arguments.
    pub fn with_extra_args(mut self, extra_args: ExtraArgs) -> Self {
        self.extra_args = Some(extra_args);
        self
    }
}

/// A state of the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing has happened yet.
    Idle,
    /// The script is being handed to the scheduler.
    Submitting,
    /// The scheduler accepted the script.
    Submitted,
    /// Waiting for the job to leave the queue.
    Polling,
    /// Looking up the terminal status of the job.
    Classifying,
    /// The job completed successfully.
    Succeeded,
    /// The job did not complete and will be submitted again.
    Retrying,
    /// Every attempt was used without a successful completion.
    Exhausted,
    /// The scheduler rejected the script.
    SubmissionFailed,
}

/// The transient record of a run's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobRun {
    /// The zero-based attempt number.
    pub attempt: u64,
    /// The identifier of the current attempt's job, once submitted.
    pub job: Option<JobId>,
    /// The terminal status of the current attempt's job, once classified.
    pub status: Option<JobStatus>,
}

/// A state transition published by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    /// The state that was entered.
    pub state: LifecycleState,
    /// The run as of entering the state.
    pub run: JobRun,
}

/// The result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// A job completed successfully.
    Succeeded {
        /// The job that completed.
        job: JobId,
        /// The success status.
        status: JobStatus,
        /// The number of jobs submitted.
        attempts: u64,
    },
    /// The scheduler rejected the script.
    SubmissionFailed {
        /// The number of submissions made, including the rejected one.
        attempts: u64,
    },
    /// No job completed within the attempt limit.
    Exhausted {
        /// The status of the final job, if accounting had one.
        last_status: Option<JobStatus>,
        /// The number of jobs submitted.
        attempts: u64,
    },
}

impl Outcome {
    /// Whether a job completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// The number of submissions made.
    pub fn attempts(&self) -> u64 {
        match self {
            Self::Succeeded { attempts, .. }
            | Self::SubmissionFailed { attempts }
            | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Drives job scripts through submission, polling and retry.
#[derive(Debug, Clone)]
pub struct Controller {
    /// The scheduler.
    gateway: Arc<dyn SchedulerGateway>,
    /// The maximum number of jobs submitted per run.
    max_retries: u64,
    /// The wait between queue checks.
    poll_interval: Duration,
    /// The log file name, relative to the save directory.
    log_file_name: String,
    /// Where state transitions are published, if anywhere.
    events: Option<broadcast::Sender<LifecycleEvent>>,
}

impl Controller {
    /// Creates a controller.
    ///
    /// A `max_retries` of zero makes every run exhaust without submitting.
    pub fn new(gateway: Arc<dyn SchedulerGateway>, config: &ControllerConfig) -> Self {
        Self {
            gateway,
            max_retries: config.max_retries,
            poll_interval: config.poll_interval(),
            log_file_name: config.log_file_name.clone(),
            events: None,
        }
    }

    /// Publishes state transitions on the given channel.
    pub fn with_events(mut self, events: broadcast::Sender<LifecycleEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Overrides the maximum number of jobs submitted per run.
    pub fn with_max_retries(mut self, max_retries: u64) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Overrides the wait between queue checks.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The maximum number of jobs submitted per run.
    pub fn max_retries(&self) -> u64 {
        self.max_retries
    }

    /// The wait between queue checks.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Materializes the request's script and runs it to an outcome.
    ///
    /// Errors are returned only for failures to read or write scripts and
    /// for scheduler commands that cannot be invoked at all.
    pub async fn run(&self, request: &RunRequest) -> Result<Outcome> {
        self.publish(LifecycleState::Idle, &JobRun::default());
        let script = self.prepare(request).await?;
        self.run_script(&script).await
    }

    /// Creates the save directory and materializes the script into it.
    ///
    /// Returns the path of the materialized script.
    pub async fn prepare(&self, request: &RunRequest) -> Result<PathBuf> {
        fs::create_dir_all(&request.save_dir)
            .await
            .map_err(|e| Error::io(&request.save_dir, e))?;
        let save_dir = absolute(&request.save_dir).map_err(|e| Error::io(&request.save_dir, e))?;

        let name = request
            .template
            .file_name()
            .ok_or_else(|| Error::InvalidScript {
                path: request.template.clone(),
                reason: "the template path does not name a file".to_string(),
            })?;
        let script = save_dir.join(name);

        let mut directives = request.directives.clone();
        directives.insert(
            OUTPUT_DIRECTIVE,
            save_dir.join(&self.log_file_name).display(),
        );

        materialize(
            &request.template,
            &script,
            &directives,
            request.extra_args.as_ref(),
        )
        .await?;

        info!(script = %script.display(), "job script materialized");
        Ok(script)
    }

    /// Submits an already materialized script until a job completes, the
    /// scheduler rejects it, or the attempt limit is reached.
    pub async fn run_script(&self, script: &Path) -> Result<Outcome> {
        let mut run = JobRun::default();

        let outcome = loop {
            if run.attempt >= self.max_retries {
                warn!(
                    attempts = run.attempt,
                    last_status = ?run.status.as_ref().map(JobStatus::as_str),
                    "maximum number of attempts reached; giving up"
                );
                self.publish(LifecycleState::Exhausted, &run);
                break Outcome::Exhausted {
                    last_status: run.status.clone(),
                    attempts: run.attempt,
                };
            }

            self.publish(LifecycleState::Submitting, &run);
            info!(
                attempt = run.attempt + 1,
                max = self.max_retries,
                script = %script.display(),
                "submitting job"
            );
            let Some(job) = self.gateway.submit(script).await? else {
                warn!(attempt = run.attempt + 1, "job submission failed");
                self.publish(LifecycleState::SubmissionFailed, &run);
                break Outcome::SubmissionFailed {
                    attempts: run.attempt + 1,
                };
            };
            run.job = Some(job.clone());
            run.status = None;
            self.publish(LifecycleState::Submitted, &run);
            info!(%job, "job submitted; waiting for completion");

            self.publish(LifecycleState::Polling, &run);
            self.wait_for_job(&job).await?;

            self.publish(LifecycleState::Classifying, &run);
            run.status = self.gateway.terminal_status(&job).await?;
            info!(
                %job,
                status = run.status.as_ref().map(JobStatus::as_str).unwrap_or("<none>"),
                "job left the queue"
            );

            if let Some(status) = run.status.clone().filter(JobStatus::is_completed) {
                self.publish(LifecycleState::Succeeded, &run);
                info!(%job, "job completed successfully");
                break Outcome::Succeeded {
                    job,
                    status,
                    attempts: run.attempt + 1,
                };
            }

            run.attempt += 1;
            if run.attempt < self.max_retries {
                warn!(
                    %job,
                    status = run.status.as_ref().map(JobStatus::as_str).unwrap_or("<none>"),
                    "job failed or ended unexpectedly; retrying"
                );
                self.publish(LifecycleState::Retrying, &run);
            }
        };

        Ok(outcome)
    }

    /// Waits until the scheduler no longer lists the job.
    ///
    /// There is no overall timeout; a job that stays queued keeps this
    /// waiting.
    async fn wait_for_job(&self, job: &JobId) -> Result<()> {
        while self.gateway.is_running(job).await? {
            debug!(
                %job,
                "job is still running; waiting {secs}s",
                secs = self.poll_interval.as_secs_f64()
            );
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(())
    }

    /// Publishes a state transition.
    fn publish(&self, state: LifecycleState, run: &JobRun) {
        if let Some(events) = &self.events {
            // A send only fails when nobody is listening.
            let _ = events.send(LifecycleEvent {
                state,
                run: run.clone(),
            });
        }
    }
}
