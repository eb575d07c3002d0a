//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request
//!     → dispatcher.rs (select, forward, track in flight)
//!     → pool.rs (remove-min, increment, reinsert under one lock)
//!     → forward to backend (no lock held)
//!     → notifier.rs (completion event → remove-at, decrement, reinsert)
//! ```
//!
//! # Design Decisions
//! - One lock per pool covers every comparison, swap, insert and remove
//! - Backend positions are owned by the pool, indexed by backend id
//! - Completion is an RAII guard, so failed or cancelled forwards still
//!   release their load
//! - No admission control: some backend is always selected

pub mod backend;
pub mod counter;
pub mod dispatcher;
pub mod notifier;
pub mod pool;

pub use backend::{Backend, BackendId, ConfigError, Upstream};
pub use counter::{LoadCounter, LoadUnderflow};
pub use dispatcher::{DispatchStats, Dispatcher, InFlight};
pub use pool::{Pool, PoolError};
