//! The boundary to the external scheduler.
//!
//! A [`SchedulerGateway`] is a thin adapter over three independent scheduler
//! queries. It performs no retries of its own; deciding what to do with a
//! rejected submission or a failed job is the controller's job.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

pub mod slurm;

/// A scheduler-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a job identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The terminal status of a job, exactly as reported by the scheduler's
/// accounting (for example `COMPLETED`, `FAILED`, `TIMEOUT`, or
/// `CANCELLED by 1000`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobStatus(String);

impl JobStatus {
    /// The status token of a job that finished successfully.
    pub const COMPLETED: &str = "COMPLETED";

    /// Creates a status from a raw token.
    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    /// The raw status token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the success status.
    pub fn is_completed(&self) -> bool {
        self.0 == Self::COMPLETED
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobStatus {
    fn from(status: &str) -> Self {
        Self::new(status)
    }
}

/// The submit/query contract of an external scheduler.
///
/// Every method returns `Err` only when the scheduler could not be queried
/// at all, such as when its command line tool is missing. Answers from the
/// scheduler, including rejections, are returned as `Ok`.
#[async_trait]
pub trait SchedulerGateway: Send + Sync + fmt::Debug {
    /// Submits a job script.
    ///
    /// Returns `None` if the scheduler rejected the script; the scheduler's
    /// output is logged before returning.
    async fn submit(&self, script: &Path) -> Result<Option<JobId>>;

    /// Whether the job is still queued or running.
    ///
    /// `false` means "no longer listed", which cannot be told apart from a
    /// job the scheduler never knew about.
    async fn is_running(&self, job: &JobId) -> Result<bool>;

    /// The terminal status recorded for the job, or `None` if accounting has
    /// no record of it yet.
    async fn terminal_status(&self, job: &JobId) -> Result<Option<JobStatus>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_exact_token_is_success() {
        assert!(JobStatus::from("COMPLETED").is_completed());
        assert!(!JobStatus::from("completed").is_completed());
        assert!(!JobStatus::from("FAILED").is_completed());
        assert!(!JobStatus::from("CANCELLED by 1000").is_completed());
        assert_eq!(JobStatus::from("CANCELLED by 1000").to_string(), "CANCELLED by 1000");
    }
}
