//! Request dispatcher.
//!
//! # Data Flow
//! ```text
//! request
//!     → pool.acquire()          (remove-min, increment, reinsert)
//!     → forwarder.forward()     (no pool lock held)
//!     → InFlight dropped        (completion event, exactly once)
//!     → notifier                (remove-at, decrement, reinsert)
//! ```

use axum::body::{Body, Bytes};
use axum::http::{Request, Response, StatusCode};
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::http::forward::{Forwarder, HttpForwarder};
use crate::load_balancer::backend::{Backend, BackendId, ConfigError, Upstream};
use crate::load_balancer::notifier::{self, Completion, CompletionSender};
use crate::load_balancer::pool::{Pool, PoolError};
use crate::observability::metrics;

/// Dispatch totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub completed: u64,
}

/// Routes each request to the backend with the fewest in-flight requests.
pub struct Dispatcher<F = HttpForwarder> {
    pool: Arc<Pool>,
    backends: Vec<Arc<Backend>>,
    forwarder: F,
    completions: CompletionSender,
    completed: watch::Receiver<u64>,
    dispatched: AtomicU64,
    in_flight_limit: Option<Arc<Semaphore>>,
}

impl<F: Forwarder> Dispatcher<F> {
    /// Build a dispatcher over `targets`, in order.
    ///
    /// Fails on the first malformed address; nothing is spawned in that case.
    /// On success the completion notifier is spawned onto the current Tokio
    /// runtime.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn new<I, S>(targets: I, forwarder: F) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let backends = targets
            .into_iter()
            .enumerate()
            .map(|(index, address)| {
                Upstream::parse(address.as_ref())
                    .map(|upstream| Arc::new(Backend::new(BackendId(index), upstream)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let pool = Arc::new(Pool::from_backends(backends.iter().cloned())?);

        let (completions, notifier, completed) = notifier::channel(pool.clone());
        tokio::spawn(notifier.run());

        tracing::info!(
            backends = backends.len(),
            upstreams = ?backends.iter().map(|b| b.upstream().to_string()).collect::<Vec<_>>(),
            "Dispatcher ready"
        );

        Ok(Self {
            pool,
            backends,
            forwarder,
            completions,
            completed,
            dispatched: AtomicU64::new(0),
            in_flight_limit: None,
        })
    }

    /// Bound the number of concurrent forwards. Requests over the bound wait
    /// before selection.
    ///
    /// The bound is clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn with_max_in_flight(mut self, limit: Option<usize>) -> Self {
        self.in_flight_limit =
            limit.map(|n| Arc::new(Semaphore::new(n.clamp(1, Semaphore::MAX_PERMITS))));
        self
    }

    /// Select the least loaded backend and mark it busy.
    ///
    /// The returned guard emits the completion event when dropped.
    pub fn select(&self) -> Result<InFlight, PoolError> {
        let backend = self.pool.acquire()?;
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::record_dispatch(&backend);
        Ok(InFlight {
            backend,
            completions: self.completions.clone(),
            started: Instant::now(),
        })
    }

    /// Forward `request` to the least loaded backend.
    ///
    /// Never rejects for load reasons. Forwarding failures come back as
    /// error responses from the forwarder. The request counts as in flight
    /// until the response body has been fully relayed or dropped.
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        let permit = match &self.in_flight_limit {
            Some(limit) => limit.clone().acquire_owned().await.ok(),
            None => None,
        };

        let in_flight = match self.select() {
            Ok(in_flight) => in_flight,
            Err(e) => {
                tracing::error!(error = %e, "Backend selection failed");
                return unavailable();
            }
        };

        tracing::debug!(
            backend = %in_flight.backend().id(),
            upstream = %in_flight.backend().upstream(),
            load = in_flight.backend().load(),
            method = %request.method(),
            path = %request.uri().path(),
            "Dispatching request"
        );

        let response = self
            .forwarder
            .forward(in_flight.backend().upstream(), request)
            .await;

        let (parts, body) = response.into_parts();
        Response::from_parts(
            parts,
            Body::new(TrackedBody {
                inner: body,
                _in_flight: in_flight,
                _permit: permit,
            }),
        )
    }

    /// Backends in configuration order.
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn forwarder(&self) -> &F {
        &self.forwarder
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: *self.completed.borrow(),
        }
    }

    /// Wait until every request dispatched so far has been rebalanced.
    pub async fn settled(&self) {
        let target = self.dispatched.load(Ordering::Relaxed);
        let mut completed = self.completed.clone();
        if completed.wait_for(|done| *done >= target).await.is_err() {
            tracing::warn!("Completion notifier stopped before settling");
        }
    }
}

/// A dispatched request. Dropping it reports completion, whether the forward
/// succeeded, failed or was cancelled.
#[derive(Debug)]
pub struct InFlight {
    backend: Arc<Backend>,
    completions: CompletionSender,
    started: Instant,
}

impl InFlight {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.completions.notify(Completion {
            backend: self.backend.clone(),
            elapsed: self.started.elapsed(),
        });
    }
}

/// Response body that keeps its request in flight until it is finished.
struct TrackedBody {
    inner: Body,
    _in_flight: InFlight,
    _permit: Option<OwnedSemaphorePermit>,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

fn unavailable() -> Response<Body> {
    let mut response = Response::new(Body::from("No backend available"));
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response
}
