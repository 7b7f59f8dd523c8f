//! Lamport logical clock shared by every node role.
//!
//! Each node owns exactly one [`LogicalClock`]. Inbound RPCs merge the sender's
//! timestamp with [`LogicalClock::observe`] before anything else happens, local
//! externally visible events advance it with [`LogicalClock::tick`], and outbound
//! calls are stamped with [`LogicalClock::read`] right after a tick.
//!
//! The clock only guarantees the per-node, causally consistent ordering of
//! Lamport's scheme: after a node processes a message stamped `T`, its clock is
//! strictly greater than `T`. No global total order is implied.

use std::sync::atomic::{AtomicU64, Ordering};

/// A process-local Lamport clock.
///
/// All operations are lock-free. `observe` uses a compare-and-swap loop so that
/// concurrent merges never lose an update and the value never decreases.
#[derive(Debug, Default)]
pub struct LogicalClock {
    value: AtomicU64,
}

impl LogicalClock {
    /// Create a clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at `value`.
    pub fn starting_at(value: u64) -> Self {
        Self {
            value: AtomicU64::new(value),
        }
    }

    /// Record a local event and return the new value.
    pub fn tick(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Merge a received timestamp: `max(current, received) + 1`.
    ///
    /// Returns the new value.
    pub fn observe(&self, received: u64) -> u64 {
        let mut current = self.value.load(Ordering::SeqCst);
        loop {
            let next = current.max(received).saturating_add(1);
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current value, without advancing.
    pub fn read(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}
