//! In-process metrics core
//!
//! [`InMemoryCore`] implements [`MetricsCore`] without any persistence. It
//! behaves like the real engine where the coordinator can observe it:
//! initialization completes asynchronously on a core-owned thread, submitted
//! pings are queued for the upload pass, and lifecycle calls raise the same
//! callbacks. Hosts use it for tests and for running without a native core.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::client_info::{ClientInfo, InternalConfiguration};
use crate::metrics_core::{
    CoreError, CoreEvents, CoreResult, MetricsCore, PingRequest, PingType, RecordedExperiment,
    UploadResult, UploadTask, UploadTaskAction,
};

/// Schema version segment of the submission path
const PING_SCHEMA_VERSION: u32 = 1;

/// Name of the ping sent on activity transitions
const BASELINE_PING: &str = "baseline";

/// Name of the ping carrying buffered events
const EVENTS_PING: &str = "events";

#[derive(Default)]
struct CoreState {
    initialized: bool,
    initialize_calls: usize,
    destroy_calls: usize,
    config: Option<InternalConfiguration>,
    client_info: Option<ClientInfo>,
    callbacks: Option<Arc<dyn CoreEvents>>,
    upload_enabled: bool,
    test_mode: bool,
    client_active: bool,
    experiments: HashMap<String, RecordedExperiment>,
    ping_types: BTreeMap<String, PingType>,
    pending_pings: VecDeque<PingRequest>,
    in_flight: HashMap<String, PingRequest>,
    upload_results: Vec<(String, UploadResult)>,
    throttle_ms: Option<u64>,
}

/// Metrics core that keeps all state in memory
pub struct InMemoryCore {
    state: Mutex<CoreState>,
    synchronous_callbacks: bool,
}

impl InMemoryCore {
    /// Create a core that completes initialization on its own thread
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CoreState::default()),
            synchronous_callbacks: false,
        }
    }

    /// Create a core that raises initialization callbacks on the caller's
    /// stack, before `initialize` returns
    #[must_use]
    pub fn with_synchronous_callbacks() -> Self {
        Self {
            synchronous_callbacks: true,
            ..Self::new()
        }
    }

    /// Assemble a ping and queue it for upload, then ask the host to upload.
    ///
    /// Returns `false` when upload is disabled and nothing was queued.
    pub fn submit_ping(&self, ping_name: &str, reason: Option<&str>) -> CoreResult<bool> {
        let callbacks = {
            let mut state = self.state.lock();
            if !state.initialized {
                return Err(CoreError::NotInitialized);
            }
            if !state.upload_enabled {
                debug!(ping = ping_name, "Upload disabled, ping not submitted");
                return Ok(false);
            }

            let request = build_request(&state, ping_name, reason);
            debug!(ping = ping_name, document_id = %request.document_id, "Ping queued");
            state.pending_pings.push_back(request);
            state.callbacks.clone()
        };

        if let Some(callbacks) = callbacks {
            callbacks.trigger_upload();
        }
        Ok(true)
    }

    /// Make the next upload task a `Wait` of `time_ms`
    pub fn throttle(&self, time_ms: u64) {
        self.state.lock().throttle_ms = Some(time_ms);
    }

    /// Record the activity state; returns whether the core is initialized
    fn set_client_active(&self, active: bool) -> bool {
        let mut state = self.state.lock();
        state.client_active = active;
        state.initialized
    }

    /// Whether `initialize` has been accepted and not destroyed since
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Number of `initialize` calls received over the core's lifetime
    pub fn initialize_calls(&self) -> usize {
        self.state.lock().initialize_calls
    }

    /// Number of `destroy` calls received over the core's lifetime
    pub fn destroy_calls(&self) -> usize {
        self.state.lock().destroy_calls
    }

    /// Configuration passed to the last `initialize`
    pub fn config(&self) -> Option<InternalConfiguration> {
        self.state.lock().config.clone()
    }

    /// Client info passed to the last `initialize`
    pub fn client_info(&self) -> Option<ClientInfo> {
        self.state.lock().client_info.clone()
    }

    /// Current upload-enabled flag
    pub fn is_upload_enabled(&self) -> bool {
        self.state.lock().upload_enabled
    }

    /// Current test-mode flag
    pub fn is_test_mode(&self) -> bool {
        self.state.lock().test_mode
    }

    /// Whether the client was last reported active
    pub fn is_client_active(&self) -> bool {
        self.state.lock().client_active
    }

    /// Names of the registered ping types
    pub fn ping_type_names(&self) -> Vec<String> {
        self.state.lock().ping_types.keys().cloned().collect()
    }

    /// Number of pings waiting for upload
    pub fn pending_ping_count(&self) -> usize {
        self.state.lock().pending_pings.len()
    }

    /// Every upload outcome reported so far, in order
    pub fn upload_results(&self) -> Vec<(String, UploadResult)> {
        self.state.lock().upload_results.clone()
    }
}

impl Default for InMemoryCore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryCore")
            .field("initialized", &state.initialized)
            .field("experiments", &state.experiments.len())
            .field("pending_pings", &state.pending_pings.len())
            .finish()
    }
}

fn build_request(state: &CoreState, ping_name: &str, reason: Option<&str>) -> PingRequest {
    let document_id = Uuid::new_v4().to_string();
    let application_id = state
        .config
        .as_ref()
        .map(|c| c.application_id.as_str())
        .unwrap_or_default();

    let payload = json!({
        "ping_info": {
            "reason": reason,
            "experiments": state.experiments,
        },
        "client_info": state.client_info,
    });

    let mut headers = HashMap::new();
    headers.insert(
        "Content-Type".to_string(),
        "application/json; charset=utf-8".to_string(),
    );
    if state.test_mode {
        headers.insert("X-Debug-ID".to_string(), "test".to_string());
    }

    PingRequest {
        path: format!("/submit/{application_id}/{ping_name}/{PING_SCHEMA_VERSION}/{document_id}"),
        document_id,
        body: payload.to_string().into_bytes(),
        headers,
    }
}

/// Raise the post-initialization callbacks in the order the engine does.
fn finish_initialize(callbacks: &Arc<dyn CoreEvents>, start_scheduler: bool, has_pending: bool) {
    if start_scheduler {
        callbacks.start_metrics_ping_scheduler();
    }
    callbacks.on_initialize_finished();
    if has_pending {
        callbacks.trigger_upload();
    }
}

impl MetricsCore for InMemoryCore {
    fn initialize(
        &self,
        config: InternalConfiguration,
        client_info: ClientInfo,
        callbacks: Arc<dyn CoreEvents>,
    ) -> CoreResult<()> {
        let (start_scheduler, has_pending) = {
            let mut state = self.state.lock();
            state.initialize_calls += 1;
            state.initialized = true;
            state.upload_enabled = config.upload_enabled;
            let start_scheduler = !config.use_core_mps;
            state.config = Some(config);
            state.client_info = Some(client_info);
            state.callbacks = Some(Arc::clone(&callbacks));
            (start_scheduler, !state.pending_pings.is_empty())
        };
        debug!("In-memory core initializing");

        if self.synchronous_callbacks {
            finish_initialize(&callbacks, start_scheduler, has_pending);
            return Ok(());
        }

        thread::Builder::new()
            .name("glint.core.init".to_string())
            .spawn(move || finish_initialize(&callbacks, start_scheduler, has_pending))
            .map(|_| ())
            .map_err(|e| CoreError::Internal(format!("failed to spawn init thread: {e}")))
    }

    fn set_upload_enabled(&self, enabled: bool) -> CoreResult<()> {
        let callbacks = {
            let mut state = self.state.lock();
            state.upload_enabled = enabled;
            if enabled {
                return Ok(());
            }
            state.pending_pings.clear();
            state.callbacks.clone()
        };

        if let Some(callbacks) = callbacks {
            callbacks.cancel_uploads();
        }
        Ok(())
    }

    fn set_experiment_active(
        &self,
        experiment_id: &str,
        branch: &str,
        extra: HashMap<String, String>,
    ) -> CoreResult<()> {
        trace!(experiment_id, branch, "Experiment activated");
        self.state.lock().experiments.insert(
            experiment_id.to_string(),
            RecordedExperiment {
                branch: branch.to_string(),
                extra,
            },
        );
        Ok(())
    }

    fn set_experiment_inactive(&self, experiment_id: &str) -> CoreResult<()> {
        trace!(experiment_id, "Experiment deactivated");
        self.state.lock().experiments.remove(experiment_id);
        Ok(())
    }

    fn get_experiment_data(&self, experiment_id: &str) -> CoreResult<Option<RecordedExperiment>> {
        Ok(self.state.lock().experiments.get(experiment_id).cloned())
    }

    fn destroy(&self, preserve_for_test: bool) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.destroy_calls += 1;
        state.initialized = false;
        state.callbacks = None;
        state.client_active = false;
        state.throttle_ms = None;
        state.experiments.clear();
        state.in_flight.clear();
        if !preserve_for_test {
            state.pending_pings.clear();
        }
        debug!(preserve_for_test, "In-memory core destroyed");
        Ok(())
    }

    fn set_test_mode(&self, enabled: bool) -> CoreResult<()> {
        self.state.lock().test_mode = enabled;
        Ok(())
    }

    fn handle_client_active(&self) -> CoreResult<()> {
        if self.set_client_active(true) {
            self.submit_ping(BASELINE_PING, Some("active"))?;
        }
        Ok(())
    }

    fn handle_client_inactive(&self) -> CoreResult<()> {
        if self.set_client_active(false) {
            self.submit_ping(BASELINE_PING, Some("inactive"))?;
            self.submit_ping(EVENTS_PING, Some("inactive"))?;
        }
        Ok(())
    }

    fn register_ping_type(&self, ping_type: &PingType) -> CoreResult<()> {
        self.state
            .lock()
            .ping_types
            .insert(ping_type.name.clone(), ping_type.clone());
        Ok(())
    }

    fn get_upload_task(&self) -> CoreResult<UploadTask> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Ok(UploadTask::Done);
        }
        if let Some(time_ms) = state.throttle_ms.take() {
            return Ok(UploadTask::Wait { time_ms });
        }

        match state.pending_pings.pop_front() {
            Some(request) => {
                state
                    .in_flight
                    .insert(request.document_id.clone(), request.clone());
                Ok(UploadTask::Upload { request })
            }
            None => Ok(UploadTask::Done),
        }
    }

    fn process_upload_response(
        &self,
        document_id: &str,
        result: UploadResult,
    ) -> CoreResult<UploadTaskAction> {
        let mut state = self.state.lock();
        let request = state.in_flight.remove(document_id);
        state
            .upload_results
            .push((document_id.to_string(), result));

        match result {
            UploadResult::HttpStatus(500..=599) | UploadResult::RecoverableFailure => {
                // Keep the ping for a later pass.
                if let Some(request) = request {
                    state.pending_pings.push_back(request);
                }
                Ok(UploadTaskAction::End)
            }
            UploadResult::HttpStatus(_) | UploadResult::UnrecoverableFailure => {
                Ok(UploadTaskAction::Next)
            }
        }
    }
}
