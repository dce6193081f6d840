//! Metrics Core boundary
//!
//! The metrics core owns persisted state, encoding and ping scheduling. The
//! coordinator reaches it only through [`MetricsCore`], and the core reports
//! back through [`CoreEvents`], possibly from its own threads.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client_info::{ClientInfo, InternalConfiguration};

/// Failure reported by the metrics core
#[derive(Debug, Error)]
pub enum CoreError {
    /// The call requires an initialized core
    #[error("metrics core is not initialized")]
    NotInitialized,

    /// Any other core-internal failure
    #[error("metrics core failure: {0}")]
    Internal(String),
}

/// Result type for core calls
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Data recorded for an active experiment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedExperiment {
    /// Branch the client is enrolled in
    pub branch: String,
    /// Extra metadata annotated onto pings
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// A ping type the host application registers with the core
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PingType {
    /// Ping name, unique per application
    pub name: String,
    /// Whether the ping carries the client id
    pub include_client_id: bool,
    /// Whether the ping is sent even without any recorded data
    pub send_if_empty: bool,
    /// Allowed reason codes
    pub reason_codes: Vec<String>,
}

impl PingType {
    /// Create a ping type with no reason codes
    pub fn new(name: impl Into<String>, include_client_id: bool, send_if_empty: bool) -> Self {
        Self {
            name: name.into(),
            include_client_id,
            send_if_empty,
            reason_codes: Vec::new(),
        }
    }
}

/// An assembled ping ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingRequest {
    /// Unique document id of the ping
    pub document_id: String,
    /// Path relative to the server endpoint
    pub path: String,
    /// Encoded payload
    pub body: Vec<u8>,
    /// Request headers
    pub headers: HashMap<String, String>,
}

/// Next step of an upload pass, as decided by the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTask {
    /// Upload this ping
    Upload {
        /// The ping to send
        request: PingRequest,
    },
    /// Nothing may be sent right now; try again after `time_ms`
    Wait {
        /// Milliseconds to wait
        time_ms: u64,
    },
    /// No more pings to send
    Done,
}

/// Outcome of a single ping upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadResult {
    /// The server answered with this status code
    HttpStatus(u16),
    /// The request failed in a way that may succeed later (timeout, no network)
    RecoverableFailure,
    /// The request can never succeed (malformed request)
    UnrecoverableFailure,
}

/// What the upload pass should do after reporting a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTaskAction {
    /// Ask for the next task
    Next,
    /// Stop the current pass
    End,
}

/// Callbacks the metrics core invokes, from any thread, at any time after
/// [`MetricsCore::initialize`] has been issued.
pub trait CoreEvents: Send + Sync {
    /// Initialization of the core has completed
    fn on_initialize_finished(&self);

    /// Pending pings should be uploaded
    fn trigger_upload(&self);

    /// The periodic metrics ping scheduler should start
    fn start_metrics_ping_scheduler(&self);

    /// Scheduled uploads should be cancelled
    fn cancel_uploads(&self);
}

/// Entry points of the metrics core
pub trait MetricsCore: Send + Sync {
    /// Start initialization. Returns immediately; completion is reported
    /// through [`CoreEvents::on_initialize_finished`].
    fn initialize(
        &self,
        config: InternalConfiguration,
        client_info: ClientInfo,
        callbacks: Arc<dyn CoreEvents>,
    ) -> CoreResult<()>;

    /// Enable or disable upload. Queued until the core is ready.
    fn set_upload_enabled(&self, enabled: bool) -> CoreResult<()>;

    /// Annotate pings with an active experiment
    fn set_experiment_active(
        &self,
        experiment_id: &str,
        branch: &str,
        extra: HashMap<String, String>,
    ) -> CoreResult<()>;

    /// Remove an experiment annotation
    fn set_experiment_inactive(&self, experiment_id: &str) -> CoreResult<()>;

    /// Look up an active experiment
    fn get_experiment_data(&self, experiment_id: &str) -> CoreResult<Option<RecordedExperiment>>;

    /// Release every core-held resource (storage handles, in-memory state)
    fn destroy(&self, preserve_for_test: bool) -> CoreResult<()>;

    /// Toggle the core's test mode
    fn set_test_mode(&self, enabled: bool) -> CoreResult<()>;

    /// The host application became active (foreground)
    fn handle_client_active(&self) -> CoreResult<()>;

    /// The host application became inactive (background)
    fn handle_client_inactive(&self) -> CoreResult<()>;

    /// Register a ping type
    fn register_ping_type(&self, ping_type: &PingType) -> CoreResult<()>;

    /// Fetch the next upload task
    fn get_upload_task(&self) -> CoreResult<UploadTask>;

    /// Report the outcome of uploading `document_id`
    fn process_upload_response(
        &self,
        document_id: &str,
        result: UploadResult,
    ) -> CoreResult<UploadTaskAction>;
}
