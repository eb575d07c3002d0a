//! Least-loaded HTTP load balancer.
//!
//! Each request goes to the backend currently handling the fewest in-flight
//! requests. Backends sit in a lock-guarded min-heap keyed by load; a
//! request removes the minimum, marks it busy and reinserts it, and its
//! completion repositions the backend once the forward is done.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;

pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::Dispatcher;
