//! Thread-safe counter for invocation correlation ids.
//!
//! # Why not use the number of pending calls? (for beginners)
//!
//! A tempting shortcut is to name each new call after the size of the pending
//! table ("there are 3 calls waiting, so this one is `3`").  That breaks as
//! soon as replies arrive out of order: after call `1` completes, the table
//! holds two entries again and the *next* call is also named `2`, colliding
//! with a call that is still waiting.
//!
//! An independent counter never goes backwards, so an id handed out once is
//! never handed out again for the lifetime of the connection.
//!
//! # Thread safety
//!
//! The counter is a single `AtomicU64`.  `fetch_add` reads and increments in
//! one indivisible step, so two tasks calling [`SequenceCounter::next`] at the
//! same time always receive different values, without taking a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter used to mint invocation ids.
///
/// # Examples
///
/// ```rust
/// use hub_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next_id(), "0");
/// assert_eq!(counter.next_id(), "1");
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Returns the next value and advances the counter.
    ///
    /// Wraps from `u64::MAX` to 0 instead of panicking.  At one call per
    /// nanosecond that takes centuries, so ids are unique in practice.
    pub fn next(&self) -> u64 {
        // Relaxed is enough: the value is only used as a name, it does not
        // publish any other memory.
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the next value formatted as a wire invocation id.
    pub fn next_id(&self) -> String {
        self.next().to_string()
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
