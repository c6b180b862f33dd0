//! Error types for the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while materializing, submitting, or monitoring a job.
///
/// A job that is accepted by the scheduler and later terminates with a
/// non-success status is not an error; it is retried by the controller and
/// reported through [`Outcome`](crate::Outcome).
#[derive(Debug, Error)]
pub enum Error {
    /// A template could not be read or a script could not be written.
    #[error("i/o error for `{}`: {source}", .path.display())]
    Io {
        /// The path being read or written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A script violated a structural precondition.
    #[error("invalid script `{}`: {reason}", .path.display())]
    InvalidScript {
        /// The template the script was read from.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A scheduler command could not be invoked.
    #[error("failed to run scheduler command `{command}`: {source}")]
    Gateway {
        /// The program that failed to spawn.
        command: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Creates an [`Error::Io`] for the given path.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
