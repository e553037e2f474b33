//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files.
//! Every section has defaults so an empty file yields a runnable group.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the service group.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Shutdown coordination settings.
    pub supervisor: SupervisorConfig,

    /// One entry per listener; each becomes a supervised service.
    pub listeners: Vec<ListenerConfig>,

    /// Settings shared by every HTTP listener.
    pub http: HttpConfig,

    /// Log output settings.
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            listeners: vec![
                ListenerConfig::new("0.0.0.0:8000"),
                ListenerConfig::new("0.0.0.0:8001"),
            ],
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Supervisor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Grace period shared by every listener when the group drains.
    pub grace_period_ms: u64,
}

impl SupervisorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 10_000,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Name used in logs and errors. Defaults to the bind address.
    #[serde(default)]
    pub name: Option<String>,

    /// Bind address (e.g., "0.0.0.0:8000" or ":8000").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl ListenerConfig {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            name: None,
            bind_address: bind_address.into(),
            max_connections: default_max_connections(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The listener's identity: its configured name, else its bind address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.bind_address)
    }
}

fn default_max_connections() -> usize {
    10_000
}

/// HTTP settings applied to every listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG` when set.
    pub filter: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "service_group=info,tower_http=info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
