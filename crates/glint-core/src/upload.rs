//! Ping upload pass
//!
//! A pass asks the metrics core for work until the core has nothing left to
//! send. It is always executed as a job on the dispatcher, never inline.

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::metrics_core::{MetricsCore, PingRequest, UploadResult, UploadTask, UploadTaskAction};

pub use http::HttpUploader;

/// Consecutive `Wait` tasks after which a pass gives up
pub const MAX_WAIT_ATTEMPTS: u32 = 3;

/// Sends a single ping to the ingestion server
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PingUploader: Send + Sync {
    /// Upload the request and classify the outcome
    async fn upload(&self, request: &PingRequest) -> UploadResult;
}

/// Counts of upload outcomes within one pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    /// Pings the server answered with a 2xx status
    pub uploaded: usize,
    /// Pings that failed in a retryable way (5xx, network errors)
    pub recoverable_failures: usize,
    /// Pings rejected for good (4xx, malformed requests)
    pub unrecoverable_failures: usize,
}

impl UploadSummary {
    fn record(&mut self, result: UploadResult) {
        match result {
            UploadResult::HttpStatus(200..=299) => self.uploaded += 1,
            UploadResult::HttpStatus(500..=599) | UploadResult::RecoverableFailure => {
                self.recoverable_failures += 1
            }
            UploadResult::HttpStatus(_) | UploadResult::UnrecoverableFailure => {
                self.unrecoverable_failures += 1
            }
        }
    }

    /// Total number of upload attempts
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.uploaded + self.recoverable_failures + self.unrecoverable_failures
    }
}

/// Upload everything the core has queued.
///
/// In testing mode a `Wait` task ends the pass immediately instead of
/// sleeping, which keeps test runs deterministic.
pub async fn run_upload_pass(
    core: Arc<dyn MetricsCore>,
    uploader: Arc<dyn PingUploader>,
    testing_mode: bool,
) -> Result<UploadSummary> {
    let mut summary = UploadSummary::default();
    let mut waits = 0;

    loop {
        match core.get_upload_task()? {
            UploadTask::Upload { request } => {
                waits = 0;
                let result = uploader.upload(&request).await;
                debug!(document_id = %request.document_id, ?result, "Ping upload attempted");
                summary.record(result);

                let action = core.process_upload_response(&request.document_id, result)?;
                if action == UploadTaskAction::End {
                    break;
                }
            }
            UploadTask::Wait { time_ms } => {
                if testing_mode {
                    debug!(time_ms, "Upload throttled in testing mode, ending pass");
                    break;
                }
                waits += 1;
                if waits >= MAX_WAIT_ATTEMPTS {
                    debug!(waits, "Upload still throttled, ending pass");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(time_ms)).await;
            }
            UploadTask::Done => break,
        }
    }

    if summary.attempts() > 0 {
        info!(
            uploaded = summary.uploaded,
            recoverable = summary.recoverable_failures,
            unrecoverable = summary.unrecoverable_failures,
            "Upload pass complete"
        );
    }
    Ok(summary)
}
