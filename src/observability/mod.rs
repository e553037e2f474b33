//! Observability subsystem.
//!
//! Every component logs through `tracing` with structured fields
//! (`service`, `address`, `cause`, `grace_ms`); this module only decides
//! where those events go.

pub mod logging;

pub use logging::init_logging;
