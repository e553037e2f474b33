//! Error types shared across the service group.
//!
//! - [`ServiceError`] is raised by a single listener (bind failure, runtime
//!   fault, missed shutdown deadline). It is cheap to clone so the first one
//!   can be kept as the group's exit cause while copies are logged.
//! - [`Error`] is what the binary sees: a service fault that brought the group
//!   down, a configuration problem, or a failure to watch OS signals.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::loader::ConfigError;

/// Errors produced by one network service.
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    /// The service could not start listening.
    #[error("service {service}: failed to bind {address}: {source}")]
    Bind {
        service: String,
        address: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// The service stopped serving abnormally.
    #[error("service {service}: runtime fault: {reason}")]
    RuntimeFault { service: String, reason: String },

    /// The service did not drain before its grace period ran out.
    #[error("service {service}: did not drain within {grace:?}, force-closed")]
    ShutdownTimeout { service: String, grace: Duration },
}

impl ServiceError {
    pub fn bind(service: impl Into<String>, address: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            service: service.into(),
            address: address.into(),
            source: Arc::new(source),
        }
    }

    pub fn fault(service: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::RuntimeFault {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    /// Name of the service that raised the error.
    pub fn service(&self) -> &str {
        match self {
            Self::Bind { service, .. }
            | Self::RuntimeFault { service, .. }
            | Self::ShutdownTimeout { service, .. } => service,
        }
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind_error",
            Self::RuntimeFault { .. } => "runtime_fault",
            Self::ShutdownTimeout { .. } => "shutdown_timeout",
        }
    }
}

/// Top-level error returned to the process wrapper.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to install termination signal handlers: {0}")]
    Signal(#[source] io::Error),

    #[error("supervisor has already been started")]
    AlreadyStarted,
}
