//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Classify accept errors as per-connection noise or listener faults

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error type for listener operations.
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),

    /// The connection limit semaphore was closed.
    #[error("connection limit closed")]
    Closed,
}

impl ListenerError {
    /// Whether the error concerns a single peer rather than the listener.
    ///
    /// A peer that resets or aborts between the kernel queue and `accept`
    /// leaves the listening socket healthy.
    pub fn is_transient(&self) -> bool {
        match self {
            ListenerError::Accept(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }

    /// Whether the listener can no longer accept at all.
    ///
    /// Anything else from `accept` (descriptor or buffer exhaustion, out of
    /// memory) clears up on its own and is retried after a back-off.
    pub fn is_fatal(&self) -> bool {
        match self {
            ListenerError::Accept(e) => matches!(
                e.kind(),
                io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported
            ),
            ListenerError::Bind { .. } | ListenerError::Closed => true,
        }
    }
}

/// Back-off between retried accepts, doubling up to a ceiling.
#[derive(Debug, Default)]
pub struct AcceptBackoff {
    current: Option<Duration>,
}

impl AcceptBackoff {
    const INITIAL: Duration = Duration::from_millis(5);
    const MAX: Duration = Duration::from_secs(1);

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => Self::INITIAL,
            Some(prev) => (prev * 2).min(Self::MAX),
        };
        self.current = Some(delay);
        delay
    }

    /// Start over after a successful accept.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Syntax error in a bind address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("missing port")]
    MissingPort,

    #[error("missing host")]
    MissingHost,

    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// A `host:port` bind address. The host may be a name to resolve at bind time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAddress {
    host: String,
    port: u16,
}

impl BindAddress {
    /// Parse `host:port`; the `:port` shorthand binds every IPv4 interface.
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let (host, port) = address.rsplit_once(':').ok_or(AddressError::MissingPort)?;
        let host = match host {
            "" => "0.0.0.0",
            h if h.contains(':') && !h.starts_with('[') => {
                // Unbracketed IPv6 literal such as "::1".
                return Err(AddressError::MissingPort);
            }
            h => h,
        };
        if host == "[]" {
            return Err(AddressError::MissingHost);
        }
        let port = port
            .parse()
            .map_err(|_| AddressError::InvalidPort(port.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The socket address when the host is an IP literal.
    pub fn literal(&self) -> Option<SocketAddr> {
        self.to_string().parse().ok()
    }
}

impl std::fmt::Display for BindAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to `address` with a connection limit.
    pub async fn bind(address: &str, max_connections: usize) -> Result<Self, ListenerError> {
        let addr = BindAddress::parse(address).map_err(|e| ListenerError::Bind {
            address: address.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;

        let bind_error = |source| ListenerError::Bind {
            address: address.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr.to_string()).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        tracing::debug!(
            address = %local_addr,
            max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    /// Cancel-safe: dropping the future releases any acquired permit.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::trace!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
