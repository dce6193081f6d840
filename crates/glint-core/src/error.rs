//! Error types for glint-core

use std::path::PathBuf;

use thiserror::Error;

use crate::metrics_core::CoreError;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// `initialize` was called without a data directory
    #[error("a data directory must be provided")]
    MissingDataDir,

    /// No active experiment with this id
    #[error("experiment data is not set for '{experiment_id}'")]
    ExperimentNotFound {
        /// Experiment id that was looked up
        experiment_id: String,
    },

    /// Invalid configuration value
    #[error("invalid configuration: {field}: {message}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// Configuration sources could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The metrics core reported a failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Background job submission or execution failed
    #[error("dispatch error: {0}")]
    Dispatch(#[from] glint_dispatch::Error),

    /// The owned data directory could not be removed during teardown
    #[error("failed to remove data directory {}", path.display())]
    Teardown {
        /// Directory that should have been removed
        path: PathBuf,
        /// Underlying dispatcher failure
        #[source]
        source: glint_dispatch::Error,
    },

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this is the "not found" condition of an experiment lookup
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ExperimentNotFound { .. })
    }
}
