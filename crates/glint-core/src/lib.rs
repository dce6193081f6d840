//! Glint Core - Telemetry SDK Lifecycle
//!
//! This crate governs the single metrics session of a host process:
//! - Coordinator: exactly-once initialization, reset and teardown
//! - Bridge: callbacks from the metrics core into host-side actions
//! - Upload: the upload pass run on the job dispatcher
//! - Memory: an in-process metrics core
//! - Config: layered configuration loading

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod client_info;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod global;
pub mod logging;
pub mod memory;
pub mod metrics_core;
pub mod upload;

pub use bridge::{NoopScheduler, PingScheduler};
pub use client_info::{ClientInfo, InternalConfiguration, UNKNOWN};
pub use config::Configuration;
pub use coordinator::{Coordinator, CoordinatorBuilder, InitOptions, LifecycleState, SessionConfig};
pub use error::{Error, Result};
pub use memory::InMemoryCore;
pub use metrics_core::{
    CoreError, CoreEvents, MetricsCore, PingRequest, PingType, RecordedExperiment, UploadResult,
    UploadTask, UploadTaskAction,
};
pub use upload::{run_upload_pass, HttpUploader, PingUploader, UploadSummary};

pub use glint_dispatch::{JobDispatcher, SerialDispatcher};
