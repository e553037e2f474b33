//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     AppConfig → one HttpService per listener → ServiceHandle → Supervisor
//!
//! Running (supervisor.rs, service.rs):
//!     every handle.run() + signal watcher, concurrently, in one JoinSet
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     first fault or SIGINT/SIGTERM → CancellationSignal fires
//!     → stop(grace) on every handle → join all → report one cause
//! ```
//!
//! # Design Decisions
//! - One fault is enough to drain the whole group; nothing is retried
//! - All handles share one grace period; shutdown latency is the slowest
//!   handle, not the sum
//! - The supervisor never returns while a child task is still running

pub mod service;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod supervisor;

pub use service::{NetworkService, ServiceHandle, ServiceState};
pub use shutdown::CancellationSignal;
pub use signals::{SignalWatcher, TerminationSignal};
pub use startup::{build_services, build_supervisor};
pub use supervisor::{ExitCause, Supervisor, SupervisorState};
