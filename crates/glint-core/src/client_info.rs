//! Client information and the configuration handed to the metrics core.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value recorded for client-info fields the SDK cannot determine
pub const UNKNOWN: &str = "Unknown";

/// Name this binding reports to the core
pub const LANGUAGE_BINDING_NAME: &str = "Rust";

/// Client information attached to every ping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Build identifier generated by the CI system, or [`UNKNOWN`]
    pub app_build: String,
    /// User-visible application version
    pub app_display_version: String,
    /// When the application was built (Unix epoch when not provided)
    pub app_build_date: DateTime<Utc>,
    /// Release channel
    pub channel: Option<String>,
    /// CPU architecture
    pub architecture: String,
    /// Operating system version, or [`UNKNOWN`]
    pub os_version: String,
    /// Locale in BCP 47 form
    pub locale: Option<String>,
    /// Device manufacturer (mobile platforms)
    pub device_manufacturer: Option<String>,
    /// Device model (mobile platforms)
    pub device_model: Option<String>,
    /// Android SDK version (Android only)
    pub android_sdk_version: Option<String>,
}

impl ClientInfo {
    /// Derive client info for this process.
    pub fn new(app_build: &str, app_display_version: &str, channel: Option<String>) -> Self {
        Self {
            app_build: app_build.to_string(),
            app_display_version: app_display_version.to_string(),
            app_build_date: DateTime::<Utc>::UNIX_EPOCH,
            channel,
            architecture: std::env::consts::ARCH.to_string(),
            os_version: UNKNOWN.to_string(),
            locale: None,
            device_manufacturer: None,
            device_model: None,
            android_sdk_version: None,
        }
    }
}

/// Settings the core needs to open its storage and start collecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalConfiguration {
    /// Directory the core stores its data in
    pub data_path: PathBuf,
    /// Application id sent with every ping
    pub application_id: String,
    /// Always [`LANGUAGE_BINDING_NAME`]
    pub language_binding_name: String,
    /// Initial upload-enabled state
    pub upload_enabled: bool,
    /// Number of events that forces an events ping
    pub max_events: Option<u32>,
    /// Buffer ping-lifetime writes in memory
    pub delay_ping_lifetime_io: bool,
    /// Let the core schedule the metrics ping itself
    pub use_core_mps: bool,
    /// Build identifier, or [`UNKNOWN`]
    pub app_build: String,
}

impl InternalConfiguration {
    /// Build the core configuration for a session
    pub fn new(
        data_path: &Path,
        application_id: &str,
        upload_enabled: bool,
        max_events: Option<u32>,
        app_build: &str,
    ) -> Self {
        Self {
            data_path: data_path.to_path_buf(),
            application_id: application_id.to_string(),
            language_binding_name: LANGUAGE_BINDING_NAME.to_string(),
            upload_enabled,
            max_events,
            delay_ping_lifetime_io: false,
            use_core_mps: false,
            app_build: app_build.to_string(),
        }
    }
}
