//! Mutex allocation out of region memory (spec.md §4.1).
//!
//! The teacher models locks as a `Lock<R: RawLock, T>` wrapper
//! (`kernel-rs-lib/src/lock.rs`) because a `#![no_std]` kernel cannot use an
//! OS mutex. Here the region really is just process memory, so each
//! allocated mutex is a real `parking_lot::Mutex<()>`; we keep the same
//! "allocate a mutex id out of the region, hand back an opaque handle"
//! shape so callers never talk to `parking_lot` directly.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, MutexGuard};

bitflags::bitflags! {
    /// Flags accepted by `mutex_alloc` (spec.md §4.1).
    pub struct MutexFlags: u32 {
        /// The mutex protects data that is self-blocking (may be held
        /// across a sleep/wait point).
        const SELF_BLOCK = 0b0001;
    }
}

pub type MutexId = u32;

/// A single mutex allocated out of a region's mutex substrate.
pub struct RegionMutex {
    id: MutexId,
    inner: Mutex<()>,
}

impl RegionMutex {
    pub fn id(&self) -> MutexId {
        self.id
    }

    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

/// Allocates and frees [`RegionMutex`]es, handing out monotonically
/// increasing ids. A region's substrate owns exactly one of these.
#[derive(Default)]
pub struct MutexAllocator {
    next_id: AtomicU32,
}

impl MutexAllocator {
    pub fn new() -> Self {
        MutexAllocator {
            next_id: AtomicU32::new(1),
        }
    }

    pub fn alloc(&self, _flags: MutexFlags) -> RegionMutex {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        RegionMutex {
            id,
            inner: Mutex::new(()),
        }
    }

    /// `mutex_free` (spec.md §4.1). Freeing is a no-op beyond dropping the
    /// handle: the allocator never reuses ids within a process lifetime,
    /// which sidesteps ABA bugs at the cost of wrapping only after 2^32
    /// allocations.
    pub fn free(&self, _mutex: RegionMutex) {}
}
