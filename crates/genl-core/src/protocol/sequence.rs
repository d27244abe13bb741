//! Per-session sequence numbers for request/reply correlation.
//!
//! Every request a session sends carries the next value from its
//! [`SequenceCounter`]; the service copies it into the reply header, and the
//! session drops replies that do not carry the value it is waiting for.
//!
//! Sequence number 0 is never handed out. Broadcast notifications carry 0
//! because they answer no request, which is why a notification session must
//! switch its sequence check off.

use std::sync::atomic::{AtomicU32, Ordering};

/// A thread-safe counter producing non-zero sequence numbers.
///
/// # Examples
///
/// ```rust
/// use genl_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU32,
}

impl SequenceCounter {
    /// Creates a counter whose first value is 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a counter whose first value is `first` (0 is bumped to 1).
    pub fn starting_at(first: u32) -> Self {
        Self {
            inner: AtomicU32::new(first.max(1)),
        }
    }

    /// Returns the next sequence number, skipping 0 on wrap-around.
    ///
    /// `Relaxed` ordering is enough: the value only has to be unique, it
    /// does not publish any other memory.
    pub fn next(&self) -> u32 {
        loop {
            let seq = self.inner.fetch_add(1, Ordering::Relaxed);
            if seq != 0 {
                return seq;
            }
        }
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_counter_starts_at_one() {
        // Arrange
        let counter = SequenceCounter::new();

        // Act
        let first = counter.next();

        // Assert
        assert_eq!(first, 1);
    }

    #[test]
    fn test_sequence_counter_never_yields_zero_on_wrap() {
        // Arrange – start one step before overflow
        let counter = SequenceCounter::starting_at(u32::MAX);

        // Act
        let before_wrap = counter.next();
        let after_wrap = counter.next();

        // Assert
        assert_eq!(before_wrap, u32::MAX);
        assert_eq!(after_wrap, 1, "0 is reserved for broadcasts and must be skipped");
    }

    #[test]
    fn test_starting_at_zero_is_bumped_to_one() {
        let counter = SequenceCounter::starting_at(0);
        assert_eq!(counter.next(), 1);
    }

    #[test]
    fn test_sequence_counter_is_unique_across_threads() {
        // Arrange
        let counter = Arc::new(SequenceCounter::new());
        let thread_count = 8;
        let per_thread = 500;

        // Act
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..per_thread).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), thread_count * per_thread);
        assert!(!all.contains(&0));
    }
}
