//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher and notifier produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through HTTP middleware into backend requests
//! - Metrics are cheap and no-ops without a recorder

pub mod logging;
pub mod metrics;
