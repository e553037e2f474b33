//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a validated [`AppConfig`] into one HTTP service per listener entry
//! - Hand the services to a [`Supervisor`] in configuration order
//!
//! # Design Decisions
//! - Fail fast: binding happens inside each service's run, so a bind error
//!   surfaces as that service's fault and drains the group
//! - Listener order is start order and nothing else

use crate::config::AppConfig;
use crate::http::HttpService;
use crate::lifecycle::service::ServiceHandle;
use crate::lifecycle::supervisor::Supervisor;

/// Build the HTTP services described by `config`.
pub fn build_services(config: &AppConfig) -> Vec<HttpService> {
    config
        .listeners
        .iter()
        .map(|listener| HttpService::new(listener.clone(), &config.http))
        .collect()
}

/// Build a supervisor owning one handle per configured listener.
pub fn build_supervisor(config: &AppConfig) -> Supervisor {
    let handles = build_services(config)
        .into_iter()
        .map(ServiceHandle::new)
        .collect();
    Supervisor::new(handles, config.supervisor.grace_period())
}
