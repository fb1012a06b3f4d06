//! Channel identifiers and a thread-safe local id allocator.
//!
//! Every logical channel is named by a pair of ids: the *local* id chosen by
//! this gateway when it opens the channel, and the *remote* id assigned by the
//! peer (zero when the peer does not assign one, which is the case for the
//! daemon's host services).
//!
//! # Thread safety
//!
//! The allocator uses `AtomicU32` internally, so many tasks can open channels
//! at once without a lock and still never receive the same local id.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Identifier chosen locally for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

/// Identifier assigned by the remote end of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RemoteId(pub u32);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Hands out monotonically increasing [`LocalId`]s starting at 1.
///
/// Zero is never returned so it can stand for "unassigned" in logs.  The
/// counter skips zero when it wraps around.
///
/// # Examples
///
/// ```rust
/// use devgate_core::protocol::{LocalIdAllocator, LocalId};
///
/// let ids = LocalIdAllocator::new();
/// assert_eq!(ids.next(), LocalId(1));
/// assert_eq!(ids.next(), LocalId(2));
/// ```
#[derive(Debug)]
pub struct LocalIdAllocator {
    inner: AtomicU32,
}

impl LocalIdAllocator {
    /// Creates a new allocator whose first id is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU32::new(1),
        }
    }

    /// Returns the next id and atomically advances the counter.
    pub fn next(&self) -> LocalId {
        loop {
            let id = self.inner.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return LocalId(id);
            }
        }
    }
}

impl Default for LocalIdAllocator {
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
    fn test_allocator_starts_at_one() {
        // Arrange
        let ids = LocalIdAllocator::new();

        // Act
        let first = ids.next();

        // Assert
        assert_eq!(first, LocalId(1));
    }

    #[test]
    fn test_allocator_skips_zero_on_wrap() {
        // Arrange: one step before overflow
        let ids = LocalIdAllocator {
            inner: AtomicU32::new(u32::MAX),
        };

        // Act
        let before_wrap = ids.next();
        let after_wrap = ids.next();

        // Assert
        assert_eq!(before_wrap, LocalId(u32::MAX));
        assert_eq!(after_wrap, LocalId(1), "zero is reserved");
    }

    #[test]
    fn test_allocator_is_unique_across_threads() {
        // Arrange
        let ids = Arc::new(LocalIdAllocator::new());

        // Act
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..500).map(|_| ids.next().0).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 8 * 500, "every local id must be unique");
    }

    #[test]
    fn test_display_prefixes() {
        assert_eq!(LocalId(7).to_string(), "L7");
        assert_eq!(RemoteId::default().to_string(), "R0");
    }
}
