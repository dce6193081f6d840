//! SDK configuration
//!
//! Loaded in layers, highest priority last:
//!
//! 1. Embedded defaults
//! 2. An optional TOML file supplied by the host
//! 3. `GLINT_*` environment variables
//!
//! ```toml
//! server_endpoint = "https://telemetry.example.com"
//! channel = "nightly"
//! max_events = 500
//! ```
//!
//! Or via environment variable:
//! ```bash
//! export GLINT_CHANNEL=beta
//! ```

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default telemetry ingestion endpoint
pub const DEFAULT_SERVER_ENDPOINT: &str = "https://incoming.telemetry.mozilla.org";

/// Default HTTP request timeout in seconds
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "GLINT";

/// Embedded default configuration
const DEFAULT_CONFIG: &str = r#"
server_endpoint = "https://incoming.telemetry.mozilla.org"
http_timeout_secs = 10
"#;

/// Options recognized by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Where pings are uploaded
    #[serde(default = "default_server_endpoint")]
    pub server_endpoint: String,

    /// Release channel tag, propagated into client info
    #[serde(default)]
    pub channel: Option<String>,

    /// Number of events that forces an events ping
    #[serde(default)]
    pub max_events: Option<u32>,

    /// Upload request timeout in seconds (default: 10)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

/// Returns the default ingestion endpoint.
pub fn default_server_endpoint() -> String {
    DEFAULT_SERVER_ENDPOINT.to_string()
}

/// Returns the default upload timeout in seconds.
pub fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            server_endpoint: default_server_endpoint(),
            channel: None,
            max_events: None,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Configuration {
    /// Load from embedded defaults, an optional file and the environment,
    /// then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Set the release channel
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Set the events-ping threshold
    #[must_use]
    pub fn with_max_events(mut self, max_events: u32) -> Self {
        self.max_events = Some(max_events);
        self
    }

    /// Set the upload endpoint
    #[must_use]
    pub fn with_server_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.server_endpoint = endpoint.into();
        self
    }

    /// Check the configuration for values the SDK cannot work with
    pub fn validate(&self) -> Result<()> {
        if let Err(e) = reqwest::Url::parse(&self.server_endpoint) {
            return Err(Error::InvalidConfig {
                field: "server_endpoint".to_string(),
                message: e.to_string(),
            });
        }

        if self.max_events == Some(0) {
            return Err(Error::InvalidConfig {
                field: "max_events".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.http_timeout_secs == 0 {
            return Err(Error::InvalidConfig {
                field: "http_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
