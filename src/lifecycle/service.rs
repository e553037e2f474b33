//! Run/stop lifecycle of a single listener.
//!
//! # Lifecycle
//! ```text
//! Idle ──run()──► Running ──stop()──► Stopping ──drained──► Stopped
//!   │                │                    │
//!   │                └──fault─────────────┴──────────────► Failed(cause)
//!   └──stop() before run()──────────────────────────────► Stopped
//! ```
//!
//! A [`ServiceHandle`] owns one [`NetworkService`] and two signals: `drain`
//! (stop accepting, finish in-flight work) and `force` (deadline passed,
//! drop everything). `run()` and `stop()` are meant to be called from
//! different tasks at the same time.

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;

use crate::error::ServiceError;
use crate::lifecycle::shutdown::CancellationSignal;

/// A network listener that can be started and drained.
///
/// Implementations bind in [`serve`](NetworkService::serve), serve until
/// `drain` fires, then stop accepting and resolve once in-flight work is
/// done. Dropping the returned future must close the listener and any
/// outstanding connections.
pub trait NetworkService: Send + Sync + 'static {
    /// Identity used in logs and errors.
    fn name(&self) -> &str;

    fn serve(&self, drain: CancellationSignal) -> BoxFuture<'_, Result<(), ServiceError>>;
}

/// Lifecycle state of a [`ServiceHandle`].
#[derive(Debug, Clone)]
pub enum ServiceState {
    Idle,
    Running,
    Stopping,
    Stopped,
    Failed(ServiceError),
}

impl ServiceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Failed(_))
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceState::Idle => "idle",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed(_) => "failed",
        }
    }
}

/// Owning wrapper around one listener's run/stop lifecycle.
pub struct ServiceHandle {
    service: Box<dyn NetworkService>,
    state: watch::Sender<ServiceState>,
    drain: CancellationSignal,
    force: CancellationSignal,
}

impl ServiceHandle {
    pub fn new(service: impl NetworkService) -> Self {
        let (state, _) = watch::channel(ServiceState::Idle);
        Self {
            service: Box::new(service),
            state,
            drain: CancellationSignal::new(),
            force: CancellationSignal::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn state(&self) -> ServiceState {
        self.state.borrow().clone()
    }

    /// Serve until stopped or until the listener fails.
    ///
    /// Returns `Ok` only when a stop was requested. A listener that exits on
    /// its own while nobody asked it to is reported as a runtime fault.
    pub async fn run(&self) -> Result<(), ServiceError> {
        let mut stop_requested = false;
        let started = self.state.send_if_modified(|state| match state {
            ServiceState::Idle => {
                *state = ServiceState::Running;
                true
            }
            // `stop()` moves the state before it fires the drain signal.
            ServiceState::Stopping | ServiceState::Stopped => {
                stop_requested = true;
                false
            }
            _ => false,
        });
        if !started {
            if stop_requested || self.drain.is_fired() {
                tracing::debug!(service = %self.name(), "Stop requested before start, not serving");
                return Ok(());
            }
            return Err(ServiceError::fault(self.name(), "service is already running"));
        }

        tracing::info!(service = %self.name(), "Service starting");
        let _guard = AbortGuard {
            state: &self.state,
            name: self.name(),
        };

        let served = tokio::select! {
            result = self.service.serve(self.drain.clone()) => result,
            _ = self.force.fired() => {
                tracing::warn!(service = %self.name(), "Service force-closed");
                Ok(())
            }
        };

        let result = match served {
            Ok(()) if !self.drain.is_fired() => Err(ServiceError::fault(
                self.name(),
                "listener exited without a stop request",
            )),
            Err(err) if self.drain.is_fired() => {
                tracing::warn!(
                    service = %self.name(),
                    error = %err,
                    "Service reported an error while stopping"
                );
                Ok(())
            }
            other => other,
        };

        match &result {
            Ok(()) => {
                tracing::info!(service = %self.name(), "Service stopped");
                self.state.send_replace(ServiceState::Stopped);
            }
            Err(err) => {
                self.state.send_replace(ServiceState::Failed(err.clone()));
            }
        }
        result
    }

    /// Ask the service to drain, force-closing it once `grace` has elapsed.
    ///
    /// Idempotent. Only the first call owns the deadline; later calls wait
    /// for the service to reach a terminal state and succeed. Once this
    /// returns, `run()` has returned or will return `Ok` without serving.
    pub async fn stop(&self, grace: Duration) -> Result<(), ServiceError> {
        self.state.send_if_modified(|state| match state {
            ServiceState::Idle => {
                *state = ServiceState::Stopped;
                true
            }
            ServiceState::Running => {
                *state = ServiceState::Stopping;
                true
            }
            _ => false,
        });

        let mut state = self.state.subscribe();
        if !self.drain.fire() {
            wait_terminal(&mut state).await;
            return Ok(());
        }

        tracing::info!(
            service = %self.name(),
            grace_ms = grace.as_millis() as u64,
            "Stopping service"
        );

        if tokio::time::timeout(grace, wait_terminal(&mut state)).await.is_ok() {
            return Ok(());
        }

        tracing::warn!(
            service = %self.name(),
            grace_ms = grace.as_millis() as u64,
            "Service did not drain within grace period, force-closing"
        );
        self.force.fire();
        wait_terminal(&mut state).await;

        Err(ServiceError::ShutdownTimeout {
            service: self.name().to_string(),
            grace,
        })
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.name())
            .field("state", &self.state.borrow().as_label())
            .finish()
    }
}

/// Marks the handle failed if `run()` is dropped or unwinds before reaching
/// a terminal state, so `stop()` never waits on a run that is gone.
struct AbortGuard<'a> {
    state: &'a watch::Sender<ServiceState>,
    name: &'a str,
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        let name = self.name;
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = ServiceState::Failed(ServiceError::fault(name, "run aborted"));
            true
        });
    }
}

async fn wait_terminal(state: &mut watch::Receiver<ServiceState>) {
    loop {
        if state.borrow_and_update().is_terminal() {
            return;
        }
        // The sender is owned by the handle we are borrowed from.
        if state.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    enum Script {
        /// Serve until drained.
        Healthy,
        /// Ignore the drain request entirely.
        Stubborn,
        /// Return immediately as if the listener closed itself.
        ExitEarly,
        /// Fail to bind.
        BindFailure,
    }

    struct Scripted {
        script: Script,
    }

    impl NetworkService for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn serve(&self, drain: CancellationSignal) -> BoxFuture<'_, Result<(), ServiceError>> {
            Box::pin(async move {
                match self.script {
                    Script::Healthy => {
                        drain.fired().await;
                        Ok(())
                    }
                    Script::Stubborn => std::future::pending().await,
                    Script::ExitEarly => Ok(()),
                    Script::BindFailure => Err(ServiceError::bind(
                        "scripted",
                        "127.0.0.1:1",
                        std::io::Error::from(std::io::ErrorKind::AddrInUse),
                    )),
                }
            })
        }
    }

    fn handle(script: Script) -> Arc<ServiceHandle> {
        Arc::new(ServiceHandle::new(Scripted { script }))
    }

    fn spawn_run(handle: &Arc<ServiceHandle>) -> tokio::task::JoinHandle<Result<(), ServiceError>> {
        let handle = Arc::clone(handle);
        tokio::spawn(async move { handle.run().await })
    }

    async fn wait_running(handle: &ServiceHandle) {
        while !matches!(handle.state(), ServiceState::Running) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn stop_unblocks_run_with_ok() {
        let handle = handle(Script::Healthy);
        let run = spawn_run(&handle);
        wait_running(&handle).await;

        handle.stop(Duration::from_secs(1)).await.unwrap();
        assert!(run.await.unwrap().is_ok());
        assert!(matches!(handle.state(), ServiceState::Stopped));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let handle = handle(Script::Healthy);
        let run = spawn_run(&handle);
        wait_running(&handle).await;

        let (first, second) = tokio::join!(
            handle.stop(Duration::from_secs(1)),
            handle.stop(Duration::from_secs(1))
        );
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(handle.stop(Duration::from_secs(1)).await.is_ok());
        assert!(run.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn stop_before_run_skips_serving() {
        let handle = handle(Script::Stubborn);
        handle.stop(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(handle.state(), ServiceState::Stopped));

        assert!(handle.run().await.is_ok());
    }

    #[tokio::test]
    async fn run_racing_a_stop_before_drain_fires_is_not_a_fault() {
        let handle = handle(Script::Stubborn);
        // First half of `stop()`: state moved, drain not fired yet.
        handle.state.send_replace(ServiceState::Stopped);
        assert!(!handle.drain.is_fired());

        assert!(handle.run().await.is_ok());
        assert!(matches!(handle.state(), ServiceState::Stopped));
        assert!(handle.stop(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_service_is_force_closed_after_grace() {
        let handle = handle(Script::Stubborn);
        let run = spawn_run(&handle);
        wait_running(&handle).await;

        let err = handle.stop(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, ServiceError::ShutdownTimeout { grace, .. } if grace == Duration::from_millis(200)));
        assert!(run.await.unwrap().is_ok());
        assert!(matches!(handle.state(), ServiceState::Stopped));
    }

    #[tokio::test]
    async fn unrequested_exit_is_a_fault() {
        let handle = handle(Script::ExitEarly);
        let err = handle.run().await.unwrap_err();
        assert_eq!(err.as_label(), "runtime_fault");
        assert!(matches!(handle.state(), ServiceState::Failed(_)));

        // Stopping a failed service is a no-op.
        assert!(handle.stop(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn bind_failure_is_surfaced() {
        let handle = handle(Script::BindFailure);
        let err = handle.run().await.unwrap_err();
        assert_eq!(err.as_label(), "bind_error");
        assert!(matches!(handle.state(), ServiceState::Failed(ServiceError::Bind { .. })));
    }

    #[tokio::test]
    async fn aborted_run_leaves_a_terminal_state() {
        let handle = handle(Script::Healthy);
        let run = spawn_run(&handle);
        wait_running(&handle).await;

        run.abort();
        let _ = run.await;
        assert!(matches!(handle.state(), ServiceState::Failed(_)));
        assert!(handle.stop(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn second_run_while_running_is_rejected() {
        let handle = handle(Script::Healthy);
        let run = spawn_run(&handle);
        wait_running(&handle).await;

        assert!(handle.run().await.is_err());
        handle.stop(Duration::from_secs(1)).await.unwrap();
        assert!(run.await.unwrap().is_ok());
    }
}
