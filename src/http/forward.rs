//! Forwarding to a backend.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the selected upstream
//! - Strip hop-by-hop headers in both directions
//! - Relay the backend response, or answer 502 when the backend fails

use axum::body::Body;
use axum::http::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    uri::{PathAndQuery, Scheme},
    Request, Response, StatusCode, Uri,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::future::Future;
use std::time::Duration;

use crate::load_balancer::Upstream;

/// Sends a request to one upstream and produces the response for the client.
///
/// Forwarding never fails at the type level: transport errors are turned into
/// an error response by the implementation.
pub trait Forwarder: Send + Sync + 'static {
    fn forward(
        &self,
        upstream: &Upstream,
        request: Request<Body>,
    ) -> impl Future<Output = Response<Body>> + Send;
}

/// Plain HTTP forwarder backed by a pooled hyper client.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpConnector, Body>,
}

impl HttpForwarder {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Forwarder for HttpForwarder {
    fn forward(
        &self,
        upstream: &Upstream,
        request: Request<Body>,
    ) -> impl Future<Output = Response<Body>> + Send {
        let client = self.client.clone();
        let upstream_name = upstream.to_string();
        let prepared = prepare_request(upstream, request);

        async move {
            let request = match prepared {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(upstream = %upstream_name, error = %e, "Failed to build upstream request");
                    return error_response(StatusCode::BAD_GATEWAY, "Invalid upstream request");
                }
            };

            match client.request(request).await {
                Ok(response) => {
                    let (mut parts, body) = response.into_parts();
                    strip_hop_by_hop(&mut parts.headers);
                    Response::from_parts(parts, Body::new(body))
                }
                Err(e) => {
                    tracing::warn!(upstream = %upstream_name, error = %e, "Upstream error");
                    error_response(StatusCode::BAD_GATEWAY, "Upstream request failed")
                }
            }
        }
    }
}

/// Point the request at `upstream` and drop connection-scoped headers.
pub fn prepare_request(
    upstream: &Upstream,
    request: Request<Body>,
) -> Result<Request<Body>, axum::http::Error> {
    let (mut parts, body) = request.into_parts();
    parts.uri = rewrite_uri(upstream, &parts.uri)?;
    strip_hop_by_hop(&mut parts.headers);
    parts.headers.insert(
        header::HOST,
        HeaderValue::from_str(upstream.authority().as_str())?,
    );
    Ok(Request::from_parts(parts, body))
}

/// Build the upstream URI: base path joined with the request path, base
/// query merged in front of the request query.
pub fn rewrite_uri(upstream: &Upstream, original: &Uri) -> Result<Uri, axum::http::Error> {
    let path = join_paths(upstream.base_path(), original.path());
    let query = match (upstream.base_query(), original.query()) {
        (Some(base), Some(q)) if !q.is_empty() => Some(format!("{}&{}", base, q)),
        (Some(base), _) => Some(base.to_string()),
        (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    };
    let path_and_query = match query {
        Some(q) => format!("{}?{}", path, q),
        None => path,
    };

    Ok(Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(upstream.authority().clone())
        .path_and_query(PathAndQuery::try_from(path_and_query)?)
        .build()?)
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    for name in ["keep-alive", "proxy-connection", "proxy-authenticate"] {
        headers.remove(name);
    }
}

fn error_response(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}
