//! Event Bridge
//!
//! The metrics core drives host-side actions through [`CoreEvents`]. The
//! bridge translates those callbacks into coordinator state changes and
//! dispatcher submissions. Callbacks may arrive on any thread, including the
//! thread that is still inside `Coordinator::initialize`; the coordinator
//! never holds its state lock across a core call, so taking it here cannot
//! deadlock.

use std::sync::{Arc, Weak};

use glint_dispatch::job;
use tracing::{debug, info, warn};

use crate::coordinator::Shared;
use crate::metrics_core::CoreEvents;
use crate::upload::run_upload_pass;

/// Host-platform hook for periodic ping scheduling.
///
/// Both methods default to doing nothing; platform bindings override them
/// to drive their own schedulers. Actual cancellation of queued work is left
/// to the job dispatcher.
pub trait PingScheduler: Send + Sync {
    /// Start the periodic metrics ping scheduler
    fn start_metrics_ping_scheduler(&self) {
        debug!("No metrics ping scheduler installed");
    }

    /// Cancel scheduled uploads
    fn cancel_uploads(&self) {
        debug!("No upload scheduler installed, nothing to cancel");
    }
}

/// Scheduler used when the host installs none
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl PingScheduler for NoopScheduler {}

/// Callback target handed to the metrics core.
///
/// Holds a non-owning reference to the coordinator; callbacks that arrive
/// after the coordinator is gone are ignored.
pub(crate) struct EventBridge {
    shared: Weak<Shared>,
}

impl EventBridge {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }

    fn coordinator(&self, event: &str) -> Option<Arc<Shared>> {
        let shared = self.shared.upgrade();
        if shared.is_none() {
            debug!(event, "Coordinator dropped, ignoring core callback");
        }
        shared
    }
}

impl CoreEvents for EventBridge {
    fn on_initialize_finished(&self) {
        debug!("EventBridge.on_initialize_finished");
        let Some(shared) = self.coordinator("on_initialize_finished") else {
            return;
        };
        shared.state.lock().init_finished = true;
        info!("Metrics core initialization finished");
    }

    fn trigger_upload(&self) {
        debug!("EventBridge.trigger_upload");
        let Some(shared) = self.coordinator("trigger_upload") else {
            return;
        };

        let (testing_mode, uploader) = {
            let state = shared.state.lock();
            (state.testing_mode, state.uploader.clone())
        };
        let Some(uploader) = uploader else {
            warn!("Upload triggered before initialize, ignoring");
            return;
        };

        let core = Arc::clone(&shared.core);
        let submitted = shared.dispatcher.submit(job(async move {
            let summary = run_upload_pass(core, uploader, testing_mode).await?;
            debug!(?summary, testing_mode, "Upload pass finished");
            anyhow::Ok(())
        }));

        match submitted {
            Ok(handle) => debug!(job_id = handle.id(), testing_mode, "Upload pass submitted"),
            Err(e) => warn!(error = %e, "Failed to submit upload pass"),
        }
    }

    fn start_metrics_ping_scheduler(&self) {
        debug!("EventBridge.start_metrics_ping_scheduler");
        if let Some(shared) = self.coordinator("start_metrics_ping_scheduler") {
            shared.scheduler.start_metrics_ping_scheduler();
        }
    }

    fn cancel_uploads(&self) {
        debug!("EventBridge.cancel_uploads");
        if let Some(shared) = self.coordinator("cancel_uploads") {
            shared.scheduler.cancel_uploads();
        }
    }
}
