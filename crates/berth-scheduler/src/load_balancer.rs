//! Round-robin index selection.
//!
//! Lock-free: an `AtomicUsize` counter taken modulo the pool size, so
//! concurrent `allocate` calls each advance the rotation once.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the next index below `count`, or `None` for an empty pool.
    pub fn next(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        Some(self.counter.fetch_add(1, Ordering::Relaxed) % count)
    }
}
