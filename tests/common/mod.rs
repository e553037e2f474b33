//! Shared mock services for supervisor tests.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use service_group::{CancellationSignal, NetworkService, ServiceError, ServiceHandle, TerminationSignal};
use tokio::sync::{oneshot, Notify};

/// How a mock listener behaves once started.
#[derive(Clone)]
pub enum Behavior {
    /// Serve until drained.
    Healthy,
    /// Fail with a runtime fault after the delay unless drained first.
    FailAfter(Duration),
    /// Fail with a runtime fault when the notify fires unless drained first.
    FailOn(Arc<Notify>),
    /// Fail to bind immediately.
    BindFailure,
    /// Ignore the drain request; only a force-close ends it.
    IgnoreStop,
    /// Take this long to drain once asked.
    SlowDrain(Duration),
}

/// What a mock observed, readable after its handle has been moved.
#[derive(Clone, Default)]
pub struct Probe {
    stop_observed: Arc<AtomicBool>,
    drained: Arc<AtomicBool>,
}

impl Probe {
    pub fn stop_observed(&self) -> bool {
        self.stop_observed.load(Ordering::SeqCst)
    }

    pub fn drained(&self) -> bool {
        self.drained.load(Ordering::SeqCst)
    }
}

pub struct MockService {
    name: String,
    address: String,
    behavior: Behavior,
    probe: Probe,
}

impl NetworkService for MockService {
    fn name(&self) -> &str {
        &self.name
    }

    fn serve(&self, drain: CancellationSignal) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move {
            let fault = |reason: &str| ServiceError::fault(&self.name, reason);
            let result = match &self.behavior {
                Behavior::Healthy => {
                    drain.fired().await;
                    Ok(())
                }
                Behavior::FailAfter(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(*delay) => Err(fault("injected fault")),
                        _ = drain.fired() => Ok(()),
                    }
                }
                Behavior::FailOn(trigger) => {
                    tokio::select! {
                        _ = trigger.notified() => Err(fault("injected fault")),
                        _ = drain.fired() => Ok(()),
                    }
                }
                Behavior::BindFailure => Err(ServiceError::bind(
                    &self.name,
                    &self.address,
                    io::Error::new(io::ErrorKind::AddrInUse, "address already in use"),
                )),
                Behavior::IgnoreStop => std::future::pending().await,
                Behavior::SlowDrain(delay) => {
                    drain.fired().await;
                    self.probe.stop_observed.store(true, Ordering::SeqCst);
                    tokio::time::sleep(*delay).await;
                    Ok(())
                }
            };

            if drain.is_fired() {
                self.probe.stop_observed.store(true, Ordering::SeqCst);
            }
            if result.is_ok() {
                self.probe.drained.store(true, Ordering::SeqCst);
            }
            result
        })
    }
}

/// Build a handle for a mock listener named `name` on `address`.
pub fn mock(name: &str, address: &str, behavior: Behavior) -> (ServiceHandle, Probe) {
    let probe = Probe::default();
    let service = MockService {
        name: name.to_string(),
        address: address.to_string(),
        behavior,
        probe: probe.clone(),
    };
    (ServiceHandle::new(service), probe)
}

/// A termination source the test fires by hand.
pub fn termination() -> (
    oneshot::Sender<TerminationSignal>,
    impl std::future::Future<Output = io::Result<TerminationSignal>> + Send + 'static,
) {
    let (tx, rx) = oneshot::channel();
    let source = async move { rx.await.map_err(|_| io::Error::other("termination sender dropped")) };
    (tx, source)
}

/// A termination request delivered after `delay`.
pub async fn terminate_after(delay: Duration, signal: TerminationSignal) -> io::Result<TerminationSignal> {
    tokio::time::sleep(delay).await;
    Ok(signal)
}
