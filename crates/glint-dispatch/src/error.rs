//! Error types for glint-dispatch

use thiserror::Error;

use crate::dispatcher::JobId;

/// Dispatcher error type
#[derive(Debug, Error)]
pub enum Error {
    /// The worker is gone and no longer accepts jobs
    #[error("dispatcher is closed")]
    Closed,

    /// The worker thread or its runtime could not be started
    #[error("failed to start dispatcher worker: {0}")]
    Runtime(#[from] std::io::Error),

    /// The job ran and reported a failure (or panicked)
    #[error("job {id} failed: {message}")]
    JobFailed {
        /// Job identifier
        id: JobId,
        /// Flattened error chain
        message: String,
    },

    /// The job was cancelled before it started
    #[error("job {id} was cancelled before it started")]
    Cancelled {
        /// Job identifier
        id: JobId,
    },

    /// The worker dropped the job without reporting an outcome
    #[error("job {id} was abandoned by the worker")]
    Abandoned {
        /// Job identifier
        id: JobId,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
