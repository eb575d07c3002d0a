//! Backend pool: a min-heap of backends keyed by in-flight load.
//!
//! # Responsibilities
//! - Keep backends ordered so the least loaded one is always at the root
//! - Track each member's index so a known backend can be removed in O(log n)
//! - Serialize every structural operation behind one lock
//!
//! # Design Decisions
//! - Load comparisons used for sifting happen under the same lock as the
//!   resulting swap, so heap shape and observed load never disagree
//! - Positions live in a map owned by the heap, keyed by `BackendId`;
//!   backends never record their own position
//! - Ties are not broken; any valid heap order is accepted

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::load_balancer::backend::{Backend, BackendId};

/// Invariant violations detected by the pool.
///
/// None of these happen while callers go through [`Pool`]'s composite
/// operations; they indicate a broken locking discipline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("pool is empty")]
    Empty,

    #[error("position {position} is out of bounds for pool of size {len}")]
    StalePosition { position: usize, len: usize },

    #[error("backend {0} is not a pool member")]
    NotMember(BackendId),

    #[error("backend {0} is already a pool member")]
    AlreadyMember(BackendId),

    #[error("load of backend {0} would drop below zero")]
    LoadUnderflow(BackendId),
}

/// Heap storage. Only reachable through a [`PoolGuard`].
#[derive(Debug, Default)]
pub struct LoadHeap {
    entries: Vec<Arc<Backend>>,
    positions: HashMap<BackendId, usize>,
}

impl LoadHeap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True iff the element at `i` has strictly smaller load than the one at `j`.
    ///
    /// # Panics
    /// Panics if either index is out of bounds.
    pub fn less(&self, i: usize, j: usize) -> bool {
        self.entries[i].load() < self.entries[j].load()
    }

    /// Exchange two elements and record their new positions.
    ///
    /// # Panics
    /// Panics if either index is out of bounds.
    pub fn swap(&mut self, i: usize, j: usize) {
        self.entries.swap(i, j);
        self.record_position(i);
        self.record_position(j);
    }

    /// Index of a member, or `None` if the backend is not in the pool.
    pub fn position_of(&self, id: BackendId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    /// Least loaded member, without removing it.
    pub fn peek(&self) -> Option<&Arc<Backend>> {
        self.entries.first()
    }

    /// Members in storage order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.entries.iter()
    }

    /// Append a backend and sift it up. Returns its final position.
    pub fn insert(&mut self, backend: Arc<Backend>) -> Result<usize, PoolError> {
        let id = backend.id();
        if self.position_of(id).is_some() {
            return Err(PoolError::AlreadyMember(id));
        }

        self.entries.push(backend);
        let last = self.entries.len() - 1;
        self.record_position(last);
        Ok(self.sift_up(last))
    }

    /// Remove and return the least loaded backend.
    pub fn remove_min(&mut self) -> Result<Arc<Backend>, PoolError> {
        if self.entries.is_empty() {
            return Err(PoolError::Empty);
        }
        let backend = self.take(0);
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Ok(backend)
    }

    /// Remove and return the backend at a known position.
    pub fn remove_at(&mut self, position: usize) -> Result<Arc<Backend>, PoolError> {
        let len = self.entries.len();
        if position >= len {
            return Err(PoolError::StalePosition { position, len });
        }
        let backend = self.take(position);
        if position < self.entries.len() && self.sift_down(position) == position {
            self.sift_up(position);
        }
        Ok(backend)
    }

    /// Move the element at `position` to the end and pop it.
    fn take(&mut self, position: usize) -> Arc<Backend> {
        let last = self.entries.len() - 1;
        if position != last {
            self.swap(position, last);
        }
        let backend = self.entries.swap_remove(last);
        self.positions.remove(&backend.id());
        backend
    }

    fn record_position(&mut self, index: usize) {
        let id = self.entries[index].id();
        self.positions.insert(id, index);
    }

    fn sift_up(&mut self, mut index: usize) -> usize {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.less(index, parent) {
                break;
            }
            self.swap(index, parent);
            index = parent;
        }
        index
    }

    fn sift_down(&mut self, mut index: usize) -> usize {
        let len = self.entries.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, index) {
                break;
            }
            self.swap(index, child);
            index = child;
        }
        index
    }

    /// Check heap order and the position table. Used by tests.
    pub fn verify(&self) -> Result<(), String> {
        for (index, backend) in self.entries.iter().enumerate() {
            if index > 0 {
                let parent = (index - 1) / 2;
                if self.less(index, parent) {
                    return Err(format!(
                        "heap order violated at {} (load {}) under {} (load {})",
                        index,
                        backend.load(),
                        parent,
                        self.entries[parent].load()
                    ));
                }
            }
            if self.position_of(backend.id()) != Some(index) {
                return Err(format!(
                    "backend {} recorded at {:?}, stored at {}",
                    backend.id(),
                    self.position_of(backend.id()),
                    index
                ));
            }
        }
        let recorded = self.positions.len();
        if recorded != self.entries.len() {
            return Err(format!(
                "{} positions recorded for {} members",
                recorded,
                self.entries.len()
            ));
        }
        Ok(())
    }
}

/// Exclusive access to the heap for the duration of the guard.
pub type PoolGuard<'a> = MutexGuard<'a, LoadHeap>;

/// Concurrency-safe pool of backends ordered by load.
#[derive(Debug, Default)]
pub struct Pool {
    heap: Mutex<LoadHeap>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool holding the given backends.
    pub fn from_backends<I>(backends: I) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = Arc<Backend>>,
    {
        let pool = Pool::new();
        {
            let mut heap = pool.lock();
            for backend in backends {
                heap.insert(backend)?;
            }
        }
        Ok(pool)
    }

    /// Take the pool lock. Every heap operation made through the guard is
    /// part of one critical section.
    pub fn lock(&self) -> PoolGuard<'_> {
        // A panic under the lock cannot leave a half-applied swap behind,
        // so a poisoned heap is still consistent.
        self.heap.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn less(&self, i: usize, j: usize) -> bool {
        self.lock().less(i, j)
    }

    pub fn swap(&self, i: usize, j: usize) {
        self.lock().swap(i, j)
    }

    pub fn insert(&self, backend: Arc<Backend>) -> Result<usize, PoolError> {
        self.lock().insert(backend)
    }

    pub fn remove_min(&self) -> Result<Arc<Backend>, PoolError> {
        self.lock().remove_min()
    }

    pub fn remove_at(&self, position: usize) -> Result<Arc<Backend>, PoolError> {
        self.lock().remove_at(position)
    }

    pub fn position_of(&self, id: BackendId) -> Option<usize> {
        self.lock().position_of(id)
    }

    /// Select the least loaded backend and mark it busy.
    ///
    /// Remove-minimum, increment and reinsert run as one critical section.
    pub fn acquire(&self) -> Result<Arc<Backend>, PoolError> {
        let mut heap = self.lock();
        let backend = heap.remove_min()?;
        backend.load_counter().increment();
        heap.insert(backend.clone())?;
        Ok(backend)
    }

    /// Mark one request on `backend` finished and reposition it.
    ///
    /// Remove-by-position, decrement and reinsert run as one critical
    /// section. The backend is always reinserted, even when the decrement is
    /// rejected. Returns the backend's new load.
    pub fn release(&self, backend: &Backend) -> Result<usize, PoolError> {
        let mut heap = self.lock();
        let id = backend.id();
        let position = heap.position_of(id).ok_or(PoolError::NotMember(id))?;
        let member = heap.remove_at(position)?;
        let decremented = member.load_counter().decrement();
        heap.insert(member)?;
        decremented.map_err(|_| PoolError::LoadUnderflow(id))
    }

    /// Loads of all members in storage order.
    pub fn loads(&self) -> Vec<(BackendId, usize)> {
        self.lock().iter().map(|b| (b.id(), b.load())).collect()
    }
}
