//! HTTP listener service.
//!
//! # Responsibilities
//! - Bind the configured address and accept connections with backpressure
//! - Serve an Axum router over HTTP/1.1 and HTTP/2 (auto-detected)
//! - Wire up middleware (request ID, timeout, tracing)
//! - Drain on request: stop accepting, let each connection finish, then return
//!
//! Dropping the serving future aborts every connection task, which is how a
//! missed grace period turns into a force-close.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::Service;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{HttpConfig, ListenerConfig};
use crate::error::ServiceError;
use crate::http::request::UuidRequestId;
use crate::lifecycle::{CancellationSignal, NetworkService};
use crate::net::{
    AcceptBackoff, ConnectionGuard, ConnectionPermit, ConnectionTracker, Listener, ListenerError,
};

/// One HTTP listener. Cheap to clone; clones observe the same listener.
#[derive(Clone)]
pub struct HttpService {
    name: String,
    config: ListenerConfig,
    router: Router,
    tracker: ConnectionTracker,
    local_addr: Arc<watch::Sender<Option<SocketAddr>>>,
}

impl HttpService {
    /// Create a listener serving the default router.
    pub fn new(config: ListenerConfig, http: &HttpConfig) -> Self {
        let router = default_router(config.display_name());
        Self::with_router(config, http, router)
    }

    /// Create a listener serving `router`.
    pub fn with_router(config: ListenerConfig, http: &HttpConfig, router: Router) -> Self {
        let (local_addr, _) = watch::channel(None);
        Self {
            name: config.display_name().to_string(),
            router: with_middleware(router, http),
            config,
            tracker: ConnectionTracker::new(),
            local_addr: Arc::new(local_addr),
        }
    }

    /// Address the listener is bound to, while it is accepting.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.borrow()
    }

    /// Wait until the listener is bound and return its address.
    pub async fn bound_addr(&self) -> SocketAddr {
        let mut rx = self.local_addr.subscribe();
        loop {
            if let Some(addr) = *rx.borrow_and_update() {
                return addr;
            }
            if rx.changed().await.is_err() {
                // Unreachable while `self` holds the sender.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Connections currently open on this listener.
    pub fn active_connections(&self) -> usize {
        self.tracker.active_count()
    }

    async fn serve_until(&self, drain: CancellationSignal) -> Result<(), ServiceError> {
        let listener = Listener::bind(&self.config.bind_address, self.config.max_connections)
            .await
            .map_err(|e| match e {
                ListenerError::Bind { address, source } => ServiceError::bind(&self.name, address, source),
                other => ServiceError::fault(&self.name, other),
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServiceError::fault(&self.name, e))?;
        self.local_addr.send_replace(Some(addr));

        tracing::info!(
            service = %self.name,
            address = %addr,
            max_connections = listener.max_connections(),
            "HTTP service listening"
        );

        let mut connections = JoinSet::new();
        let mut backoff = AcceptBackoff::default();
        let stopped = drain.fired();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        backoff.reset();
                        let guard = self.tracker.track();
                        connections.spawn(serve_connection(
                            self.router.clone(),
                            stream,
                            peer,
                            permit,
                            guard,
                            drain.clone(),
                        ));
                    }
                    Err(err) if err.is_transient() => {
                        tracing::debug!(service = %self.name, error = %err, "Skipping failed accept");
                    }
                    Err(err) if err.is_fatal() => {
                        self.local_addr.send_replace(None);
                        return Err(ServiceError::fault(&self.name, err));
                    }
                    Err(err) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(
                            service = %self.name,
                            error = %err,
                            retry_ms = delay.as_millis() as u64,
                            "Accept failed, retrying"
                        );
                        tokio::select! {
                            _ = &mut stopped => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        tracing::warn!(service = %self.name, error = %err, "Connection task failed");
                    }
                }
            }
        }

        drop(listener);
        self.local_addr.send_replace(None);
        tracing::info!(
            service = %self.name,
            in_flight = self.tracker.active_count(),
            "Stopped accepting, draining connections"
        );

        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(service = %self.name, error = %err, "Connection task failed");
            }
        }
        self.tracker.wait_idle().await;

        tracing::info!(service = %self.name, "HTTP service drained");
        Ok(())
    }
}

impl NetworkService for HttpService {
    fn name(&self) -> &str {
        &self.name
    }

    fn serve(&self, drain: CancellationSignal) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(self.serve_until(drain))
    }
}

impl std::fmt::Debug for HttpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpService")
            .field("name", &self.name)
            .field("bind_address", &self.config.bind_address)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Serve one connection, switching it to graceful shutdown when the
/// listener starts draining.
async fn serve_connection(
    router: Router,
    stream: TcpStream,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    guard: ConnectionGuard,
    drain: CancellationSignal,
) {
    let service = service_fn(move |request: Request<Incoming>| router.clone().call(request));
    let builder = Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let stopped = drain.fired();
    tokio::pin!(stopped);
    let mut draining = false;

    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(err) = result {
                    tracing::debug!(
                        connection_id = %guard.id(),
                        peer_addr = %peer,
                        error = %err,
                        "Connection ended with error"
                    );
                }
                break;
            }
            _ = &mut stopped, if !draining => {
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

/// `GET /` names the listener; everything else is a 404.
pub fn default_router(name: &str) -> Router {
    let banner = format!("{name}\n");
    Router::new()
        .route(
            "/",
            get(move || {
                let banner = banner.clone();
                async move { banner }
            }),
        )
        .fallback(not_found)
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 page not found\n")
}

#[allow(deprecated)]
fn with_middleware(router: Router, http: &HttpConfig) -> Router {
    router
        .layer(TimeoutLayer::new(http.request_timeout()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
}
