//! OS signal handling.
//!
//! # Responsibilities
//! - Register termination handlers (SIGINT, SIGTERM, SIGQUIT; Ctrl-C on Windows)
//! - Translate the first delivery into a [`TerminationSignal`]
//!
//! # Design Decisions
//! - Handlers are registered once, before any listener starts, so a signal
//!   arriving during startup is not lost
//! - Tokio's signal streams coalesce repeated deliveries; a second signal
//!   during shutdown is absorbed rather than queued or blocked on

use std::fmt;
use std::io;

/// The kind of termination request received from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGINT or Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGQUIT.
    Quit,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminationSignal::Interrupt => "SIGINT",
            TerminationSignal::Terminate => "SIGTERM",
            TerminationSignal::Quit => "SIGQUIT",
        };
        f.write_str(name)
    }
}

/// Registered termination handlers.
#[cfg(unix)]
#[derive(Debug)]
pub struct SignalWatcher {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalWatcher {
    /// Register handlers. Must be called from within a Tokio runtime.
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    /// Wait for the next termination request.
    pub async fn recv(&mut self) -> io::Result<TerminationSignal> {
        let received = tokio::select! {
            r = self.interrupt.recv() => r.map(|_| TerminationSignal::Interrupt),
            r = self.terminate.recv() => r.map(|_| TerminationSignal::Terminate),
            r = self.quit.recv() => r.map(|_| TerminationSignal::Quit),
        };
        received.ok_or_else(closed)
    }
}

/// Registered termination handlers.
#[cfg(not(unix))]
#[derive(Debug)]
pub struct SignalWatcher {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(not(unix))]
impl SignalWatcher {
    /// Register handlers. Must be called from within a Tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    /// Wait for the next termination request.
    pub async fn recv(&mut self) -> io::Result<TerminationSignal> {
        self.ctrl_c
            .recv()
            .await
            .map(|_| TerminationSignal::Interrupt)
            .ok_or_else(closed)
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "signal stream closed")
}
