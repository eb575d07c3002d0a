//! In-flight request counter for a single backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Returned when a counter already at zero is decremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("load counter decremented below zero")]
pub struct LoadUnderflow;

/// Number of requests currently being forwarded to one backend.
///
/// Every update is an atomic read-modify-write, so no update is lost under
/// contention. Ordering decisions in the pool are made while holding the
/// pool lock; reads outside of it are only good for diagnostics.
#[derive(Debug, Default)]
pub struct LoadCounter {
    value: AtomicUsize,
}

impl LoadCounter {
    pub fn new(initial: usize) -> Self {
        Self {
            value: AtomicUsize::new(initial),
        }
    }

    /// Current load.
    pub fn value(&self) -> usize {
        self.value.load(Ordering::Relaxed)
    }

    /// Increment and return the new load.
    pub fn increment(&self) -> usize {
        self.value.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement and return the new load.
    ///
    /// The counter is left untouched when it is already zero.
    pub fn decrement(&self) -> Result<usize, LoadUnderflow> {
        self.value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
            .map(|prev| prev - 1)
            .map_err(|_| LoadUnderflow)
    }
}
