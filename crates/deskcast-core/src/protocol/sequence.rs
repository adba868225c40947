//! Thread-safe sequence counter for numbering media frames.
//!
//! The capture source stamps every [`EncodedFrame`](crate::EncodedFrame) with
//! the next value so that a peer (or a log line) can tell how many frames were
//! dropped between two that did arrive.

use std::sync::atomic::{AtomicU64, Ordering};

/// A lock-free, monotonically increasing counter.
///
/// Values start at 0 and wrap at `u64::MAX` without panicking.
///
/// # Examples
///
/// ```rust
/// use deskcast_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence number and atomically increments the counter.
    ///
    /// `Relaxed` is enough: the numbers order frames, they do not publish
    /// memory to other threads.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the value the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}
