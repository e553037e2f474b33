//! # Supervisor: runs a group of services that stop together.
//!
//! ```text
//! Initializing ──run()──► Running ──first terminal event──► Draining ──all joined──► Terminated
//!
//! Running:
//!   JoinSet ─┬─ handle[0].run()
//!            ├─ handle[1].run()        any Err ─┐
//!            ├─ ...                             ├─► record cause (first wins) ─► signal.fire()
//!            └─ signal watcher  ── SIGINT/TERM ─┘
//!
//! Draining:
//!   join_all(handle[i].stop(grace))     concurrent, bounded by the slowest handle
//!   join every task in the JoinSet     nothing outlives run()
//! ```
//!
//! Exactly one cause is reported: the first fault by completion order, or the
//! external termination request when no fault came first. Everything else is
//! logged and kept in [`Supervisor::suppressed_errors`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinSet};

use crate::error::{Error, ServiceError};
use crate::lifecycle::service::ServiceHandle;
use crate::lifecycle::shutdown::CancellationSignal;
use crate::lifecycle::signals::{SignalWatcher, TerminationSignal};

const SIGNAL_WATCHER: &str = "signal-watcher";

/// Supervisor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Initializing,
    Running,
    Draining,
    Terminated,
}

/// Why the group shut down.
#[derive(Debug, Clone)]
pub enum ExitCause {
    /// A deliberate request from the environment. Not a fault.
    External(TerminationSignal),
    /// A service failed and took the group down.
    Fault(ServiceError),
}

impl ExitCause {
    pub fn is_clean(&self) -> bool {
        matches!(self, ExitCause::External(_))
    }
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCause::External(signal) => write!(f, "external termination ({signal})"),
            ExitCause::Fault(err) => write!(f, "{err}"),
        }
    }
}

/// State shared between the supervisor and its child tasks.
#[derive(Debug, Default)]
struct Shared {
    signal: CancellationSignal,
    cause: OnceLock<ExitCause>,
    suppressed: Mutex<Vec<ServiceError>>,
}

impl Shared {
    /// Record `cause` if none is set yet, then fire the signal.
    fn trigger(&self, cause: ExitCause) {
        if let Err(rejected) = self.cause.set(cause) {
            match rejected {
                ExitCause::Fault(err) => {
                    tracing::warn!(
                        service = %err.service(),
                        error = %err,
                        "Shutdown cause already recorded, suppressing error"
                    );
                    self.suppress(err);
                }
                ExitCause::External(signal) => {
                    tracing::debug!(%signal, "Termination requested while already draining");
                }
            }
        }
        self.signal.fire();
    }

    fn suppress(&self, err: ServiceError) {
        self.suppressed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err);
    }
}

/// Owns a group of [`ServiceHandle`]s and drives their coordinated shutdown.
#[derive(Debug)]
pub struct Supervisor {
    handles: Vec<Arc<ServiceHandle>>,
    grace: Duration,
    shared: Arc<Shared>,
    state: watch::Sender<SupervisorState>,
}

impl Supervisor {
    /// Create a supervisor. Handles start in the given order.
    pub fn new(handles: Vec<ServiceHandle>, grace: Duration) -> Self {
        let (state, _) = watch::channel(SupervisorState::Initializing);
        Self {
            handles: handles.into_iter().map(Arc::new).collect(),
            grace,
            shared: Arc::new(Shared::default()),
            state,
        }
    }

    pub fn handles(&self) -> &[Arc<ServiceHandle>] {
        &self.handles
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Errors observed after the shutdown cause was recorded.
    pub fn suppressed_errors(&self) -> Vec<ServiceError> {
        self.shared
            .suppressed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run every service until one fails or the process is asked to stop.
    ///
    /// Signal handlers are registered before any service starts.
    pub async fn run(&self) -> Result<TerminationSignal, Error> {
        let mut watcher = SignalWatcher::install().map_err(Error::Signal)?;
        self.run_until(async move { watcher.recv().await }).await
    }

    /// Run every service until one fails or `termination` resolves.
    ///
    /// Returns the termination request on a clean shutdown, or the first
    /// service fault. Does not return before every service has stopped.
    pub async fn run_until<F>(&self, termination: F) -> Result<TerminationSignal, Error>
    where
        F: Future<Output = io::Result<TerminationSignal>> + Send + 'static,
    {
        let started = self.state.send_if_modified(|state| {
            if *state == SupervisorState::Initializing {
                *state = SupervisorState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(Error::AlreadyStarted);
        }

        tracing::info!(
            services = self.handles.len(),
            grace_ms = self.grace.as_millis() as u64,
            "Supervisor starting"
        );

        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        for handle in &self.handles {
            let handle = Arc::clone(handle);
            let shared = Arc::clone(&self.shared);
            let name = handle.name().to_string();
            let task = tasks.spawn(async move {
                if let Err(err) = handle.run().await {
                    tracing::error!(
                        service = %handle.name(),
                        error = %err,
                        kind = err.as_label(),
                        "Service failed"
                    );
                    shared.trigger(ExitCause::Fault(err));
                }
            });
            names.insert(task.id(), name);
        }
        let task = tasks.spawn(watch_termination(termination, Arc::clone(&self.shared)));
        names.insert(task.id(), SIGNAL_WATCHER.to_string());

        let cancelled = self.shared.signal.fired();
        tokio::pin!(cancelled);
        loop {
            tokio::select! {
                _ = &mut cancelled => break,
                joined = tasks.join_next() => match joined {
                    Some(Err(err)) => self.on_task_error(&names, err),
                    Some(Ok(())) => {}
                    None => break,
                },
            }
        }

        self.drain().await;

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                self.on_task_error(&names, err);
            }
        }
        self.state.send_replace(SupervisorState::Terminated);

        match self.shared.cause.get().cloned() {
            Some(ExitCause::External(signal)) => {
                tracing::info!(%signal, "All services stopped after termination request");
                Ok(signal)
            }
            Some(ExitCause::Fault(err)) => {
                tracing::error!(
                    service = %err.service(),
                    error = %err,
                    "All services stopped after fault"
                );
                Err(err.into())
            }
            None => Err(ServiceError::fault("supervisor", "cancelled without a recorded cause").into()),
        }
    }

    /// Stop every handle concurrently with the shared grace period.
    async fn drain(&self) {
        self.state.send_replace(SupervisorState::Draining);
        if let Some(cause) = self.shared.cause.get() {
            tracing::info!(
                cause = %cause,
                grace_ms = self.grace.as_millis() as u64,
                "Draining services"
            );
        }

        let stops = self.handles.iter().map(|handle| handle.stop(self.grace));
        for result in join_all(stops).await {
            if let Err(err) = result {
                tracing::warn!(service = %err.service(), error = %err, "Service shutdown incomplete");
                self.shared.suppress(err);
            }
        }
    }

    fn on_task_error(&self, names: &HashMap<task::Id, String>, err: JoinError) {
        let name = names
            .get(&err.id())
            .map(String::as_str)
            .unwrap_or("unknown");
        tracing::error!(service = name, error = %err, "Supervised task aborted");
        self.shared
            .trigger(ExitCause::Fault(ServiceError::fault(name, format!("task aborted: {err}"))));
    }
}

/// Wait for a termination request or for a sibling to cancel the group.
async fn watch_termination<F>(termination: F, shared: Arc<Shared>)
where
    F: Future<Output = io::Result<TerminationSignal>>,
{
    let cancelled = shared.signal.fired();
    tokio::select! {
        biased;
        _ = cancelled => {
            tracing::debug!("Signal watcher exiting, group already cancelled");
        }
        received = termination => match received {
            Ok(signal) => {
                tracing::info!(%signal, "Termination requested");
                shared.trigger(ExitCause::External(signal));
            }
            Err(err) => {
                tracing::error!(error = %err, "Signal watcher failed");
                shared.trigger(ExitCause::Fault(ServiceError::fault(SIGNAL_WATCHER, err)));
            }
        },
    }
}
