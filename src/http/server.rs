//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all handler
//! - Wire up middleware (request id, tracing, timeout)
//! - Hand every request to the dispatcher
//! - Drain gracefully on shutdown

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::HeaderValue, Request},
    response::Response,
    routing::any,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::http::forward::HttpForwarder;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::load_balancer::{ConfigError, Dispatcher};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// HTTP front end of the balancer.
pub struct HttpServer {
    router: Router,
    dispatcher: Arc<Dispatcher>,
}

impl HttpServer {
    /// Build the dispatcher from configuration and wrap it in a server.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let forwarder = HttpForwarder::new(Duration::from_secs(config.timeouts.connect_secs));
        let dispatcher = Dispatcher::new(&config.backends, forwarder)?
            .with_max_in_flight(config.dispatch.max_in_flight);
        Ok(Self::with_dispatcher(Arc::new(dispatcher), config))
    }

    /// Serve an existing dispatcher.
    pub fn with_dispatcher(dispatcher: Arc<Dispatcher>, config: &ProxyConfig) -> Self {
        let state = AppState {
            dispatcher: dispatcher.clone(),
        };
        let router = Self::build_router(config, state);
        Self { router, dispatcher }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Router without connection info, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Accept connections until a shutdown signal arrives, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.dispatcher.backends().len(),
            "HTTP server starting"
        );

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        let stats = self.dispatcher.stats();
        tracing::info!(
            dispatched = stats.dispatched,
            completed = stats.completed,
            "HTTP server stopped"
        );
        Ok(())
    }
}

/// Catch-all handler: every request goes to the least loaded backend.
async fn proxy_handler(State(state): State<AppState>, mut request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    if let Some(peer) = peer {
        append_forwarded_for(&mut request, peer);
    }

    tracing::debug!(
        request_id = %request_id(&request),
        method = %request.method(),
        path = %request.uri().path(),
        "Proxying request"
    );

    state.dispatcher.dispatch(request).await
}

/// Append the client address to `X-Forwarded-For`.
fn append_forwarded_for(request: &mut Request<Body>, peer: SocketAddr) {
    let client = peer.ip().to_string();
    let headers = request.headers_mut();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client),
        None => client,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
