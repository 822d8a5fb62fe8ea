//! Identity tokens handed to the host as callback user-data.
//!
//! Keying scratch tables by a record's own allocation address would be an
//! aliasing hazard: the host would hold a raw pointer the core could free
//! out from under it. `ScratchId` is an arena index instead: a dense
//! `u64` safe to copy into the host's opaque user-data slot.

use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque per-event identity, unique for the lifetime of the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScratchId(u64);

impl ScratchId {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Reconstructs a `ScratchId` from the raw value the host hands back
    /// through its opaque user-data channel.
    pub fn from_u64(value: u64) -> Self {
        ScratchId(value)
    }
}

/// Hands out monotonically increasing `ScratchId`s.
///
/// One instance lives in the process-wide context; every translation
/// callback that allocates a scratch event draws a fresh id from it before
/// inserting into a Correlation Table.
#[derive(Debug, Default)]
pub struct ScratchIdAllocator {
    next: AtomicU64,
}

impl ScratchIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    pub fn alloc(&self) -> ScratchId {
        ScratchId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_unique() {
        let allocator = ScratchIdAllocator::new();
        let a = allocator.alloc();
        let b = allocator.alloc();
        let c = allocator.alloc();
        assert!(a.as_u64() < b.as_u64());
        assert!(b.as_u64() < c.as_u64());
    }
}
