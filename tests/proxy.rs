//! End-to-end tests: reqwest client → proxy → raw-TCP backends.

mod common;

use common::*;
use std::time::Duration;

use leastload_proxy::config::ProxyConfig;
use leastload_proxy::load_balancer::ConfigError;
use leastload_proxy::HttpServer;

#[tokio::test]
async fn test_request_reaches_backend() {
    let backend = start_mock_backend("hello from backend").await;
    let proxy = start_proxy(vec![backend.url()]).await;

    let resp = client()
        .get(proxy.url("/users/42?verbose=1"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));
    assert_eq!(resp.text().await.unwrap(), "hello from backend");

    let head = backend.last_request().unwrap();
    assert!(
        head.starts_with("GET /users/42?verbose=1 HTTP/1.1\r\n"),
        "unexpected request head: {}",
        head
    );
    let lower = head.to_ascii_lowercase();
    assert!(lower.contains("x-request-id:"));
    assert!(lower.contains("x-forwarded-for: 127.0.0.1"));

    proxy.dispatcher.settled().await;
    assert_eq!(proxy.dispatcher.pool().loads(), vec![(proxy.dispatcher.backends()[0].id(), 0)]);
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let backend = start_mock_backend("ok").await;
    let proxy = start_proxy(vec![backend.url()]).await;

    let resp = client()
        .get(proxy.url("/"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.headers()["x-request-id"], "abc-123");
    assert!(backend
        .last_request()
        .unwrap()
        .to_ascii_lowercase()
        .contains("x-request-id: abc-123"));
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_concurrent_requests_spread_across_backends() {
    let mut backends = Vec::new();
    for _ in 0..4 {
        backends.push(start_slow_backend("ok", Duration::from_millis(50)).await);
    }
    let proxy = start_proxy(backends.iter().map(|b| b.url()).collect()).await;
    let client = client();

    let mut handles = Vec::new();
    for i in 0..100 {
        let client = client.clone();
        let url = proxy.url(&format!("/item/{}", i));
        handles.push(tokio::spawn(async move {
            client.get(url).send().await.map(|r| r.status().as_u16())
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 200);
    }

    proxy.dispatcher.settled().await;

    let stats = proxy.dispatcher.stats();
    assert_eq!(stats.dispatched, 100);
    assert_eq!(stats.completed, 100);
    assert_eq!(proxy.dispatcher.pool().size(), 4);
    assert!(proxy.dispatcher.pool().loads().iter().all(|(_, load)| *load == 0));
    assert!(proxy.dispatcher.pool().lock().verify().is_ok());

    let total: usize = backends.iter().map(|b| b.request_count()).sum();
    assert_eq!(total, 100);
    for backend in &backends {
        assert!(backend.request_count() > 0, "backend {} never used", backend.addr);
    }
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_dead_backend_returns_bad_gateway_and_releases_load() {
    let dead = closed_addr().await;
    let proxy = start_proxy(vec![format!("http://{}", dead)]).await;

    let resp = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), 502);

    proxy.dispatcher.settled().await;
    assert_eq!(proxy.dispatcher.backends()[0].load(), 0);
    assert_eq!(proxy.dispatcher.stats().completed, 1);
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_server_rejects_malformed_backend() {
    let config = ProxyConfig {
        backends: vec!["127.0.0.1:8081".to_string(), "http://exa mple.com".to_string()],
        ..ProxyConfig::default()
    };

    match HttpServer::new(&config) {
        Err(ConfigError::InvalidAddress { address, .. }) => {
            assert_eq!(address, "http://exa mple.com")
        }
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(_) => panic!("malformed backend accepted"),
    }
}

#[tokio::test]
async fn test_server_rejects_empty_backend_list() {
    let config = ProxyConfig::default();
    assert!(matches!(HttpServer::new(&config), Err(ConfigError::NoBackends)));
}
