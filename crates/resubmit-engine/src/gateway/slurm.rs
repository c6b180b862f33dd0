//! Slurm implementation of the scheduler gateway.
//!
//! Each operation shells out to one Slurm client command:
//!
//! - `sbatch <script>` to submit; success prints `Submitted batch job <id>`.
//! - `squeue --job <id>` to check whether the job is still listed.
//! - `sacct -j <id> --format=JobID,State --parsable2 --noheader` for the
//!   terminal status, one `<id>|<state>` record per line.
//!
//! The parsing of each command's output is kept in free functions so it can
//! be tested without a cluster.

use std::path::Path;
use std::process::Output;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;
use tracing::error;

use super::JobId;
use super::JobStatus;
use super::SchedulerGateway;
use crate::Error;
use crate::Result;
use crate::config::SchedulerConfig;

/// Matches the acceptance line printed by `sbatch`.
static SUBMITTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Submitted batch job (\d+)").expect("submission pattern should compile")
});

/// The Slurm scheduler gateway.
#[derive(Debug, Clone, Default)]
pub struct SlurmGateway {
    /// The commands to invoke.
    config: SchedulerConfig,
}

impl SlurmGateway {
    /// Creates a gateway that invokes the given commands.
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Runs a command to completion, capturing its output.
    async fn output(mut command: Command) -> Result<Output> {
        debug!(?command, "spawning scheduler command");
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        command.output().await.map_err(|source| Error::Gateway {
            command: program,
            source,
        })
    }
}

#[async_trait]
impl SchedulerGateway for SlurmGateway {
    async fn submit(&self, script: &Path) -> Result<Option<JobId>> {
        let mut command = Command::new(&self.config.submit_command);
        if let Some(args) = &self.config.extra_submit_args {
            command.args(args);
        }
        command.arg(script);

        let output = Self::output(command).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            error!(
                stdout = %stdout.trim(),
                stderr = %stderr.trim(),
                status = %output.status,
                "`sbatch` failed"
            );
            return Ok(None);
        }

        let id = parse_submitted_job_id(&stdout);
        if id.is_none() {
            error!(
                stdout = %stdout.trim(),
                stderr = %stderr.trim(),
                "`sbatch` output did not contain a job identifier"
            );
        }
        Ok(id)
    }

    async fn is_running(&self, job: &JobId) -> Result<bool> {
        let mut command = Command::new(&self.config.queue_command);
        command.arg("--job").arg(job.as_str());

        let output = Self::output(command).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        // `squeue` exits non-zero for ids that have aged out of the queue;
        // an unlisted job is simply no longer running.
        if !output.status.success() {
            debug!(
                %job,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "`squeue` exited with {status}",
                status = output.status
            );
        }
        Ok(queue_lists_job(&stdout, job))
    }

    async fn terminal_status(&self, job: &JobId) -> Result<Option<JobStatus>> {
        let mut command = Command::new(&self.config.accounting_command);
        command
            .arg("-j")
            .arg(job.as_str())
            .arg("--format=JobID,State")
            .arg("--parsable2")
            .arg("--noheader");

        let output = Self::output(command).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            error!(
                %job,
                stdout = %stdout.trim(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "`sacct` failed"
            );
        }
        Ok(parse_accounting_status(&stdout, job))
    }
}

/// Extracts the job identifier from `sbatch` output.
pub fn parse_submitted_job_id(stdout: &str) -> Option<JobId> {
    SUBMITTED
        .captures(stdout)
        .and_then(|captures| captures.get(1))
        .map(|id| JobId::new(id.as_str()))
}

/// Whether `squeue` output lists the job.
///
/// A whitespace-separated token must be the identifier itself or one of its
/// array tasks (`<id>_<index>` or `<id>_[<range>]`); a bare substring match
/// would mistake job `42` for job `420`.
pub fn queue_lists_job(stdout: &str, job: &JobId) -> bool {
    let id = job.as_str();
    stdout.split_whitespace().any(|token| {
        token == id
            || token
                .strip_prefix(id)
                .is_some_and(|rest| rest.starts_with('_'))
    })
}

/// Finds the status of the job in `sacct --parsable2` output.
///
/// Only the record whose `JobID` field is exactly the identifier counts;
/// step (`<id>.batch`) and array task (`<id>_<n>`) records are skipped.
pub fn parse_accounting_status(stdout: &str, job: &JobId) -> Option<JobStatus> {
    stdout.lines().find_map(|line| {
        let mut fields = line.trim().split('|');
        let id = fields.next()?;
        let state = fields.next()?;
        (id == job.as_str()).then(|| JobStatus::new(state))
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_submission() {
        assert_eq!(
            parse_submitted_job_id("Submitted batch job 123456\n"),
            Some(JobId::new("123456"))
        );
        assert_eq!(
            parse_submitted_job_id("sbatch: note: defaulting\nSubmitted batch job 7 on cluster a\n"),
            Some(JobId::new("7"))
        );
        assert_eq!(parse_submitted_job_id(""), None);
        assert_eq!(
            parse_submitted_job_id("sbatch: error: invalid partition specified"),
            None
        );
        assert_eq!(parse_submitted_job_id("Submitted batch job abc"), None);
    }

    #[test]
    fn queue_matches_whole_tokens() {
        let job = JobId::new("42");
        let listing = "JOBID PARTITION NAME USER ST TIME NODES\n   42 cpu train me R 0:01 1\n";
        assert!(queue_lists_job(listing, &job));
        assert!(queue_lists_job("42_3 cpu train me R 0:01 1", &job));
        assert!(queue_lists_job("42_[1-10] cpu train me PD 0:00 1", &job));
        assert!(!queue_lists_job("420 cpu train me R 0:01 1", &job));
        assert!(!queue_lists_job("142 cpu train me R 0:01 1", &job));
        assert!(!queue_lists_job("JOBID PARTITION NAME USER ST TIME NODES\n", &job));
        assert!(!queue_lists_job("", &job));
    }

    #[test]
    fn accounting_matches_exact_id() {
        let job = JobId::new("42");
        let records = "42|FAILED\n42.batch|FAILED\n42.extern|COMPLETED\n";
        assert_eq!(
            parse_accounting_status(records, &job),
            Some(JobStatus::new("FAILED"))
        );

        assert_eq!(
            parse_accounting_status("42.batch|COMPLETED\n420|COMPLETED\n", &job),
            None
        );
        assert_eq!(
            parse_accounting_status("42|CANCELLED by 1000\n", &job),
            Some(JobStatus::new("CANCELLED by 1000"))
        );
        assert_eq!(parse_accounting_status("", &job), None);
        assert_eq!(parse_accounting_status("garbage\n", &job), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_submission_yields_no_job_even_with_marker() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir().unwrap();
        let sbatch = dir.path().join("sbatch");
        std::fs::write(&sbatch, "#!/bin/sh\necho 'Submitted batch job 9'\nexit 1\n").unwrap();
        std::fs::set_permissions(&sbatch, std::fs::Permissions::from_mode(0o755)).unwrap();

        let gateway = SlurmGateway::new(SchedulerConfig {
            submit_command: sbatch,
            ..Default::default()
        });
        assert_eq!(gateway.submit(Path::new("job.sh")).await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn aged_out_job_is_not_running() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir().unwrap();
        let squeue = dir.path().join("squeue");
        std::fs::write(
            &squeue,
            "#!/bin/sh\necho 'slurm_load_jobs error: Invalid job id specified' >&2\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&squeue, std::fs::Permissions::from_mode(0o755)).unwrap();

        let gateway = SlurmGateway::new(SchedulerConfig {
            queue_command: squeue,
            ..Default::default()
        });
        assert!(!gateway.is_running(&JobId::new("42")).await.unwrap());
    }

    #[tokio::test]
    async fn missing_command_is_a_gateway_error() {
        let gateway = SlurmGateway::new(SchedulerConfig {
            submit_command: "/nonexistent/resubmit-test/sbatch".into(),
            ..Default::default()
        });

        let err = gateway
            .submit(Path::new("job.sh"))
            .await
            .expect_err("spawning a missing command should fail");
        assert!(matches!(err, Error::Gateway { .. }), "{err}");
    }
}
