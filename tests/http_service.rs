//! End-to-end tests against real HTTP listeners.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{routing::get, Router};
use service_group::config::{HttpConfig, ListenerConfig};
use service_group::http::X_REQUEST_ID;
use service_group::{Error, HttpService, ServiceError, ServiceHandle, ServiceState, Supervisor, TerminationSignal};
use tokio::sync::Notify;

mod common;

use common::termination;

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap()
}

fn listener(name: &str) -> ListenerConfig {
    ListenerConfig::new("127.0.0.1:0").named(name)
}

/// `/slow` announces itself on `entered`, then answers after `delay`.
fn slow_router(entered: Arc<Notify>, delay: Duration) -> Router {
    Router::new().route(
        "/slow",
        get(move || {
            let entered = Arc::clone(&entered);
            async move {
                entered.notify_one();
                tokio::time::sleep(delay).await;
                "done"
            }
        }),
    )
}

#[tokio::test]
async fn serves_requests_and_stops_on_termination() {
    let http = HttpConfig::default();
    let alpha = HttpService::new(listener("alpha"), &http);
    let beta = HttpService::new(listener("beta"), &http);
    let supervisor = Arc::new(Supervisor::new(
        vec![ServiceHandle::new(alpha.clone()), ServiceHandle::new(beta.clone())],
        Duration::from_secs(5),
    ));

    let (tx, source) = termination();
    let run = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run_until(source).await }
    });

    let alpha_addr = alpha.bound_addr().await;
    let beta_addr = beta.bound_addr().await;
    let client = client();

    let res = client.get(format!("http://{alpha_addr}/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key(X_REQUEST_ID));
    assert_eq!(res.text().await.unwrap(), "alpha\n");

    let res = client.get(format!("http://{beta_addr}/")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "beta\n");

    let res = client.get(format!("http://{beta_addr}/missing")).send().await.unwrap();
    assert_eq!(res.status(), 404);

    tx.send(TerminationSignal::Interrupt).unwrap();
    let signal = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("supervisor did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(signal, TerminationSignal::Interrupt);

    assert_eq!(alpha.local_addr(), None);
    assert_eq!(alpha.active_connections(), 0);
    assert!(tokio::net::TcpStream::connect(alpha_addr).await.is_err());
    for handle in supervisor.handles() {
        assert!(matches!(handle.state(), ServiceState::Stopped));
    }
}

#[tokio::test]
async fn in_flight_request_completes_during_drain() {
    let entered = Arc::new(Notify::new());
    let http = HttpConfig::default();
    let service = HttpService::with_router(
        listener("slow"),
        &http,
        slow_router(Arc::clone(&entered), Duration::from_millis(300)),
    );
    let supervisor = Supervisor::new(vec![ServiceHandle::new(service.clone())], Duration::from_secs(5));

    let (tx, source) = termination();
    let run = tokio::spawn(async move { supervisor.run_until(source).await });

    let addr = service.bound_addr().await;
    let request = tokio::spawn(async move { client().get(format!("http://{addr}/slow")).send().await });

    entered.notified().await;
    tx.send(TerminationSignal::Terminate).unwrap();

    let res = request.await.unwrap().expect("in-flight request was dropped");
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "done");

    let signal = run.await.unwrap().unwrap();
    assert_eq!(signal, TerminationSignal::Terminate);
}

#[tokio::test]
async fn address_in_use_is_reported_as_bind_error() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = occupied.local_addr().unwrap().to_string();

    let http = HttpConfig::default();
    let good = HttpService::new(listener("good"), &http);
    let clash = HttpService::new(ListenerConfig::new(taken.clone()).named("clash"), &http);
    let supervisor = Supervisor::new(
        vec![ServiceHandle::new(good), ServiceHandle::new(clash)],
        Duration::from_secs(5),
    );

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.run_until(std::future::pending()),
    )
    .await
    .expect("supervisor did not stop");

    match result {
        Err(Error::Service(ServiceError::Bind { service, address, .. })) => {
            assert_eq!(service, "clash");
            assert_eq!(address, taken);
        }
        other => panic!("expected a bind error, got {other:?}"),
    }
    assert!(matches!(supervisor.handles()[0].state(), ServiceState::Stopped));
    drop(occupied);
}

#[tokio::test]
async fn request_outliving_the_grace_period_is_force_closed() {
    let entered = Arc::new(Notify::new());
    let http = HttpConfig::default();
    let service = HttpService::with_router(
        listener("stuck"),
        &http,
        slow_router(Arc::clone(&entered), Duration::from_secs(20)),
    );
    let supervisor = Arc::new(Supervisor::new(
        vec![ServiceHandle::new(service.clone())],
        Duration::from_millis(200),
    ));

    let (tx, source) = termination();
    let run = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run_until(source).await }
    });

    let addr = service.bound_addr().await;
    let request = tokio::spawn(async move { client().get(format!("http://{addr}/slow")).send().await });
    entered.notified().await;

    let start = Instant::now();
    tx.send(TerminationSignal::Terminate).unwrap();
    let signal = run.await.unwrap().unwrap();
    assert_eq!(signal, TerminationSignal::Terminate);
    assert!(start.elapsed() < Duration::from_secs(5));

    assert!(request.await.unwrap().is_err());
    let suppressed = supervisor.suppressed_errors();
    assert!(matches!(&suppressed[..], [ServiceError::ShutdownTimeout { service, .. }] if service == "stuck"));

    // Aborted connection tasks release their slots once the runtime drops them.
    tokio::time::timeout(Duration::from_secs(1), async {
        while service.active_connections() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("force-closed connections were not released");
}

#[tokio::test]
async fn host_name_bind_addresses_are_resolved() {
    let http = HttpConfig::default();
    let service = HttpService::new(ListenerConfig::new("localhost:0").named("local"), &http);
    let supervisor = Supervisor::new(vec![ServiceHandle::new(service.clone())], Duration::from_secs(5));

    let (tx, source) = termination();
    let run = tokio::spawn(async move { supervisor.run_until(source).await });

    let addr = service.bound_addr().await;
    assert!(addr.ip().is_loopback());
    let res = client().get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "local\n");

    tx.send(TerminationSignal::Interrupt).unwrap();
    assert_eq!(run.await.unwrap().unwrap(), TerminationSignal::Interrupt);
}
