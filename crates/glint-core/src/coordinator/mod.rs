//! Lifecycle Coordinator
//!
//! Owns the single metrics session of a process:
//!
//! ```text
//! Uninitialized --initialize()--> Initializing --on_initialize_finished--> Ready
//!       ^                               |                                   |
//!       +------------reset()------------+-----------------------------------+
//! ```
//!
//! All state transitions happen under one lock. The lock is released before
//! every call into the metrics core, because the core may call back into the
//! [`EventBridge`](crate::bridge) on the same stack.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use glint_core::{Coordinator, InMemoryCore, InitOptions};
//!
//! let coordinator = Coordinator::new(Arc::new(InMemoryCore::new()))?;
//! coordinator.initialize(
//!     InitOptions::new("org.example.app", "1.0.0", true).with_data_dir("/var/lib/app/glint"),
//! )?;
//! coordinator.set_experiment_active("exp1", "branch-a", None)?;
//! ```

mod experiments;
mod state;
mod teardown;

use std::path::PathBuf;
use std::sync::Arc;

use glint_dispatch::{JobDispatcher, SerialDispatcher};
use parking_lot::Mutex;
use tracing::{debug, info, warn, Level};
use uuid::Uuid;

use crate::bridge::{EventBridge, NoopScheduler, PingScheduler};
use crate::client_info::{ClientInfo, InternalConfiguration, UNKNOWN};
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::logging;
use crate::metrics_core::{MetricsCore, PingType};
use crate::upload::{HttpUploader, PingUploader};

pub(crate) use state::Shared;
pub use state::{LifecycleState, SessionConfig};

use state::CoordinatorState;

/// Arguments of [`Coordinator::initialize`]
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Application id sent with every ping
    pub application_id: String,
    /// User-visible application version
    pub application_version: String,
    /// Initial upload-enabled state
    pub upload_enabled: bool,
    /// Data directory; required by [`Coordinator::initialize`]
    pub data_dir: Option<PathBuf>,
    /// Recognized configuration options (defaults when absent)
    pub configuration: Option<Configuration>,
    /// Build id generated by the CI system
    pub build_id: Option<String>,
    /// Installs a log subscriber capped at this level
    pub log_level: Option<Level>,
}

impl InitOptions {
    /// Options with every optional argument absent
    pub fn new(
        application_id: impl Into<String>,
        application_version: impl Into<String>,
        upload_enabled: bool,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            application_version: application_version.into(),
            upload_enabled,
            data_dir: None,
            configuration: None,
            build_id: None,
            log_level: None,
        }
    }

    /// Set the data directory
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Set the configuration
    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Set the build id
    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = Some(build_id.into());
        self
    }

    /// Set the log level
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = Some(level);
        self
    }
}

/// Wires a [`Coordinator`] to its collaborators
pub struct CoordinatorBuilder {
    core: Arc<dyn MetricsCore>,
    dispatcher: Option<Arc<dyn JobDispatcher>>,
    uploader: Option<Arc<dyn PingUploader>>,
    scheduler: Option<Arc<dyn PingScheduler>>,
}

impl CoordinatorBuilder {
    /// Start from the metrics core
    pub fn new(core: Arc<dyn MetricsCore>) -> Self {
        Self {
            core,
            dispatcher: None,
            uploader: None,
            scheduler: None,
        }
    }

    /// Use this dispatcher instead of a fresh [`SerialDispatcher`]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Use this uploader instead of an [`HttpUploader`] built at `initialize`
    pub fn uploader(mut self, uploader: Arc<dyn PingUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Install a host ping scheduler
    pub fn scheduler(mut self, scheduler: Arc<dyn PingScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Build the coordinator
    pub fn build(self) -> Result<Coordinator> {
        let dispatcher = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Arc::new(SerialDispatcher::new()?),
        };

        Ok(Coordinator {
            shared: Arc::new(Shared {
                state: Mutex::new(CoordinatorState::default()),
                core: self.core,
                dispatcher,
                scheduler: self.scheduler.unwrap_or_else(|| Arc::new(NoopScheduler)),
                uploader_override: self.uploader,
            }),
        })
    }
}

/// Process-wide lifecycle coordinator for one metrics session.
///
/// Dropping a coordinator runs [`Coordinator::shutdown`].
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Coordinator with the default dispatcher, uploader and scheduler
    pub fn new(core: Arc<dyn MetricsCore>) -> Result<Self> {
        CoordinatorBuilder::new(core).build()
    }

    /// Start configuring a coordinator
    pub fn builder(core: Arc<dyn MetricsCore>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(core)
    }

    /// Start the metrics session.
    ///
    /// Fails with [`Error::MissingDataDir`] before touching any state when no
    /// data directory is given. Calls made while a session exists are
    /// ignored. The core completes initialization asynchronously.
    pub fn initialize(&self, options: InitOptions) -> Result<()> {
        let Some(data_dir) = options.data_dir.clone() else {
            return Err(Error::MissingDataDir);
        };
        self.start(options, data_dir, false)
    }

    /// Start a session backed by a fresh temporary data directory.
    ///
    /// The coordinator owns the directory and removes it on reset. Any
    /// `data_dir` in `options` is ignored.
    pub fn initialize_for_testing(&self, options: InitOptions) -> Result<()> {
        let data_dir = std::env::temp_dir().join(format!("glint-{}", Uuid::new_v4()));
        self.start(options, data_dir, true)
    }

    fn start(&self, options: InitOptions, data_dir: PathBuf, owns_data_dir: bool) -> Result<()> {
        if redundant(&self.shared.state.lock(), &options.application_id) {
            return Ok(());
        }

        let configuration = options.configuration.unwrap_or_default();
        configuration.validate()?;
        let uploader = match &self.shared.uploader_override {
            Some(uploader) => Arc::clone(uploader),
            None => Arc::new(HttpUploader::new(&configuration)?) as Arc<dyn PingUploader>,
        };

        let build_id = options.build_id.as_deref().unwrap_or(UNKNOWN);
        let internal_config = InternalConfiguration::new(
            &data_dir,
            &options.application_id,
            options.upload_enabled,
            configuration.max_events,
            build_id,
        );
        let client_info = ClientInfo::new(
            build_id,
            &options.application_version,
            configuration.channel.clone(),
        );
        let session = SessionConfig {
            application_id: options.application_id,
            application_version: options.application_version,
            build_id: options.build_id,
            data_dir,
            upload_enabled: options.upload_enabled,
            configuration,
        };

        let (previous_session, ping_types) = {
            let mut state = self.shared.state.lock();
            if redundant(&state, &session.application_id) {
                return Ok(());
            }

            let previous_session = state.session.replace(session);
            state.initialized = true;
            state.init_finished = false;
            state.destroy_data_dir = owns_data_dir;
            state.exit_hook_armed = true;
            state.uploader = Some(uploader);

            let ping_types: Vec<PingType> = state.ping_types.values().cloned().collect();
            (previous_session, ping_types)
        };

        if owns_data_dir {
            if let Err(e) = std::fs::create_dir_all(&internal_config.data_path) {
                self.rollback(previous_session);
                return Err(e.into());
            }
        }
        if let Some(level) = options.log_level {
            if !logging::init(level) {
                debug!("Log subscriber already installed, keeping it");
            }
        }

        info!(
            application_id = %internal_config.application_id,
            data_path = %internal_config.data_path.display(),
            owns_data_dir,
            "Initializing metrics core"
        );

        let bridge = Arc::new(EventBridge::new(Arc::downgrade(&self.shared)));
        self.shared
            .core
            .initialize(internal_config, client_info, bridge)?;

        for ping_type in &ping_types {
            self.shared.core.register_ping_type(ping_type)?;
        }
        if !ping_types.is_empty() {
            debug!(count = ping_types.len(), "Replayed registered ping types");
        }
        Ok(())
    }

    /// Undo a committed `initialize` whose data directory could not be created
    fn rollback(&self, previous_session: Option<SessionConfig>) {
        let mut state = self.shared.state.lock();
        state.session = previous_session;
        state.initialized = false;
        state.destroy_data_dir = false;
        state.exit_hook_armed = false;
        state.uploader = None;
        warn!("Initialize rolled back");
    }

    /// Whether `initialize` has been accepted since the last reset
    pub fn is_initialized(&self) -> bool {
        self.shared.state.lock().initialized
    }

    /// Current lifecycle phase
    pub fn state(&self) -> LifecycleState {
        self.shared.state.lock().lifecycle()
    }

    /// Session captured by the last accepted `initialize`
    pub fn session(&self) -> Option<SessionConfig> {
        self.shared.state.lock().session.clone()
    }

    /// Configuration captured by the last accepted `initialize`
    pub fn configuration(&self) -> Option<Configuration> {
        self.shared
            .state
            .lock()
            .session
            .as_ref()
            .map(|session| session.configuration.clone())
    }

    /// Enable or disable uploading; the core queues this until it is ready
    pub fn set_upload_enabled(&self, enabled: bool) -> Result<()> {
        debug!(enabled, "Setting upload enabled");
        self.shared.core.set_upload_enabled(enabled)?;
        Ok(())
    }

    /// The application moved to the foreground
    pub fn handle_client_active(&self) -> Result<()> {
        self.shared.core.handle_client_active()?;
        Ok(())
    }

    /// The application moved to the background
    pub fn handle_client_inactive(&self) -> Result<()> {
        self.shared.core.handle_client_inactive()?;
        Ok(())
    }

    /// Toggle testing mode locally and in the core
    pub fn set_testing_mode(&self, enabled: bool) -> Result<()> {
        self.shared.state.lock().testing_mode = enabled;
        self.shared.core.set_test_mode(enabled)?;
        Ok(())
    }

    /// Whether testing mode is on
    pub fn is_testing_mode(&self) -> bool {
        self.shared.state.lock().testing_mode
    }

    /// Register a ping type.
    ///
    /// Registered types survive reset and are replayed into the core after
    /// every accepted `initialize`.
    pub fn register_ping_type(&self, ping_type: PingType) -> Result<()> {
        let forward = {
            let mut state = self.shared.state.lock();
            state
                .ping_types
                .insert(ping_type.name.clone(), ping_type.clone());
            state.initialized
        };

        if forward {
            self.shared.core.register_ping_type(&ping_type)?;
        } else {
            debug!(ping = %ping_type.name, "Ping type queued until initialize");
        }
        Ok(())
    }

    /// Dispatcher running upload and cleanup jobs
    pub fn dispatcher(&self) -> &Arc<dyn JobDispatcher> {
        &self.shared.dispatcher
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Coordinator")
            .field("state", &state.lifecycle())
            .field("testing_mode", &state.testing_mode)
            .field("destroy_data_dir", &state.destroy_data_dir)
            .field("session", &state.session)
            .finish()
    }
}

/// Logs and returns `true` when a session already exists
fn redundant(state: &CoordinatorState, application_id: &str) -> bool {
    if !state.initialized {
        return false;
    }
    warn!(
        application_id,
        state = %state.lifecycle(),
        "Coordinator already initialized, ignoring initialize call"
    );
    true
}

#[cfg(test)]
mod tests;
