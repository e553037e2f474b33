//! Supervised group of network listeners.
//!
//! Runs several HTTP listeners in one process. If any of them fails, the rest
//! are drained; if the process is asked to terminate, all of them get a
//! shared grace period to finish in-flight work before the process exits.
//!
//! # Architecture Overview
//!
//! ```text
//!   AppConfig ──► startup ──► Supervisor
//!                               │
//!              ┌────────────────┼──────────────────┐
//!              ▼                ▼                  ▼
//!        ServiceHandle    ServiceHandle      signal watcher
//!         (HttpService)    (HttpService)     (SIGINT/SIGTERM)
//!              │                │                  │
//!              └──── first fault or signal ────────┘
//!                               │
//!                     CancellationSignal fires
//!                               │
//!                  stop(grace) on every handle
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::AppConfig;
pub use error::{Error, ServiceError};
pub use http::HttpService;
pub use lifecycle::{
    CancellationSignal, ExitCause, NetworkService, ServiceHandle, ServiceState, Supervisor,
    SupervisorState, TerminationSignal,
};
