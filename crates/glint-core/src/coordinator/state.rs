//! Coordinator state and session snapshot

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use glint_dispatch::JobDispatcher;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bridge::PingScheduler;
use crate::config::Configuration;
use crate::metrics_core::{MetricsCore, PingType};
use crate::upload::PingUploader;

/// Lifecycle phase of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No session; `initialize` will be accepted
    Uninitialized,
    /// `initialize` accepted, the core has not reported completion yet
    Initializing,
    /// The core finished initialization
    Ready,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Snapshot of the arguments of the last accepted `initialize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Application id
    pub application_id: String,
    /// User-visible application version
    pub application_version: String,
    /// Build id, if the host supplied one
    pub build_id: Option<String>,
    /// Directory the core stores its data in
    pub data_dir: PathBuf,
    /// Upload-enabled flag passed to `initialize`
    pub upload_enabled: bool,
    /// Recognized configuration options
    pub configuration: Configuration,
}

/// Mutable coordinator bookkeeping, guarded by [`Shared::state`]
#[derive(Default)]
pub(crate) struct CoordinatorState {
    pub(crate) initialized: bool,
    pub(crate) init_finished: bool,
    pub(crate) testing_mode: bool,
    pub(crate) destroy_data_dir: bool,
    pub(crate) exit_hook_armed: bool,
    pub(crate) session: Option<SessionConfig>,
    pub(crate) uploader: Option<Arc<dyn PingUploader>>,
    pub(crate) ping_types: BTreeMap<String, PingType>,
}

impl CoordinatorState {
    pub(crate) fn lifecycle(&self) -> LifecycleState {
        match (self.initialized, self.init_finished) {
            (false, _) => LifecycleState::Uninitialized,
            (true, false) => LifecycleState::Initializing,
            (true, true) => LifecycleState::Ready,
        }
    }
}

/// State shared between the coordinator and its event bridge
pub(crate) struct Shared {
    pub(crate) state: Mutex<CoordinatorState>,
    pub(crate) core: Arc<dyn MetricsCore>,
    pub(crate) dispatcher: Arc<dyn JobDispatcher>,
    pub(crate) scheduler: Arc<dyn PingScheduler>,
    pub(crate) uploader_override: Option<Arc<dyn PingUploader>>,
}
