//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (grace period > 0, connection limits > 0)
//! - Detect listeners that would collide on address or name
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::AppConfig;
use crate::net::listener::BindAddress;

/// A single semantic problem with a configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("at least one listener must be configured")]
    NoListeners,

    #[error("listener {listener}: invalid bind address {address:?}: {reason}")]
    InvalidAddress {
        listener: String,
        address: String,
        reason: String,
    },

    #[error("bind address {0} is used by more than one listener")]
    DuplicateAddress(String),

    #[error("listener name {0:?} is used more than once")]
    DuplicateName(String),

    #[error("listener {0}: max_connections must be greater than zero")]
    ZeroMaxConnections(String),

    #[error("supervisor.grace_period_ms must be greater than zero")]
    ZeroGracePeriod,

    #[error("http.request_timeout_secs must be greater than zero")]
    ZeroRequestTimeout,
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listeners.is_empty() {
        errors.push(ValidationError::NoListeners);
    }
    if config.supervisor.grace_period_ms == 0 {
        errors.push(ValidationError::ZeroGracePeriod);
    }
    if config.http.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    let mut addresses = HashSet::new();
    let mut names = HashSet::new();
    for listener in &config.listeners {
        let name = listener.display_name();

        match BindAddress::parse(&listener.bind_address) {
            // Port 0 asks the OS for a fresh port, so it never collides.
            // Host names are only known to collide once resolved at bind time.
            Ok(addr) => {
                if let Some(literal) = addr.literal().filter(|a| a.port() != 0) {
                    if !addresses.insert(literal) {
                        errors.push(ValidationError::DuplicateAddress(literal.to_string()));
                    }
                }
            }
            Err(e) => errors.push(ValidationError::InvalidAddress {
                listener: name.to_string(),
                address: listener.bind_address.clone(),
                reason: e.to_string(),
            }),
        }

        if !names.insert(name) {
            errors.push(ValidationError::DuplicateName(name.to_string()));
        }
        if listener.max_connections == 0 {
            errors.push(ValidationError::ZeroMaxConnections(name.to_string()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
