//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_requests_dispatched_total` (counter): requests sent
//! - `lb_requests_completed_total` (counter): completions rebalanced
//! - `lb_backend_load` (gauge): in-flight requests
//! - `lb_forward_duration_seconds` (histogram): time a request stayed in flight
//!
//! Every series carries `backend` (id) and `upstream` (address) labels.
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing for it.

use metrics::Label;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

use crate::load_balancer::Backend;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics listener started");
    Ok(())
}

/// Labels identifying a backend. The id keeps backends that share an
/// address apart.
pub fn backend_labels(backend: &Backend) -> Vec<Label> {
    vec![
        Label::new("backend", backend.id().0.to_string()),
        Label::new("upstream", backend.upstream().to_string()),
    ]
}

pub fn record_dispatch(backend: &Backend) {
    metrics::counter!("lb_requests_dispatched_total", backend_labels(backend)).increment(1);
    metrics::gauge!("lb_backend_load", backend_labels(backend)).set(backend.load() as f64);
}

pub fn record_completion(backend: &Backend, load: usize, elapsed: Duration) {
    metrics::counter!("lb_requests_completed_total", backend_labels(backend)).increment(1);
    metrics::gauge!("lb_backend_load", backend_labels(backend)).set(load as f64);
    metrics::histogram!("lb_forward_duration_seconds", backend_labels(backend))
        .record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::BackendId;

    #[test]
    fn test_shared_address_gets_distinct_labels() {
        let a = Backend::new(BackendId(0), "127.0.0.1:3000".parse().unwrap());
        let b = Backend::new(BackendId(1), "127.0.0.1:3000".parse().unwrap());

        assert_ne!(backend_labels(&a), backend_labels(&b));
        assert_eq!(
            backend_labels(&b),
            vec![
                Label::new("backend", "1"),
                Label::new("upstream", "127.0.0.1:3000"),
            ]
        );
    }
}
