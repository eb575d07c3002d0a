//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use leastload_proxy::config::ProxyConfig;
use leastload_proxy::lifecycle::Shutdown;
use leastload_proxy::{Dispatcher, HttpServer};

/// A raw-TCP backend answering every request with a fixed body.
pub struct MockBackend {
    pub addr: SocketAddr,
    /// Request heads received, in arrival order.
    pub requests: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<String> {
        self.requests.lock().unwrap().last().cloned()
    }
}

/// Start a backend that answers immediately.
#[allow(dead_code)]
pub async fn start_mock_backend(response: &'static str) -> MockBackend {
    start_slow_backend(response, Duration::ZERO).await
}

/// Start a backend that waits `delay` before answering.
pub async fn start_slow_backend(response: &'static str, delay: Duration) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let log = log.clone();
                    tokio::spawn(async move {
                        handle(socket, response, delay, log).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockBackend { addr, requests }
}

async fn handle(mut socket: TcpStream, response: &str, delay: Duration, log: Arc<Mutex<Vec<String>>>) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    log.lock().unwrap().push(String::from_utf8_lossy(&head).into_owned());

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let response_str = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.len(),
        response
    );
    let _ = socket.write_all(response_str.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A running proxy in front of `backends`.
pub struct Proxy {
    pub addr: SocketAddr,
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: Shutdown,
}

#[allow(dead_code)]
impl Proxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn start_proxy(backends: Vec<String>) -> Proxy {
    let config = ProxyConfig {
        backends,
        ..ProxyConfig::default()
    };
    let server = HttpServer::new(&config).unwrap();
    let dispatcher = server.dispatcher().clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    Proxy {
        addr,
        dispatcher,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
