//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID)
//!     → load_balancer::Dispatcher (pick least loaded backend)
//!     → forward.rs (rewrite URI, relay to backend)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod server;

pub use forward::{Forwarder, HttpForwarder};
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
