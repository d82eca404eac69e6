//! A minimal stand-in for the page/buffer-cache layer (spec.md §1: the
//! B-tree/hash/queue page managers are external collaborators; this core
//! only needs *a* place to keep a per-page LSN so redo can be checked for
//! idempotence, spec.md §8 property 3).
//!
//! The only record type in this core that touches a "page" is
//! [`crate::fop::FOP_WRITE`], which writes a byte range of a named file.
//! We key pages by `(fid, offset)` rather than inventing a generic page
//! number, since that is the only page identity this core actually
//! produces.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::fid::Fid;
use crate::lsn::Lsn;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PageId {
    pub fid: Fid,
    pub offset: u64,
}

/// Tracks the LSN of the last record successfully applied to each page,
/// in memory only (it does not survive a crash, which is exactly why
/// redo exists).
#[derive(Default)]
pub struct PageLsnTable {
    inner: Mutex<HashMap<PageId, Lsn>>,
}

impl PageLsnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lsn_of(&self, page: PageId) -> Lsn {
        self.inner.lock().get(&page).copied().unwrap_or(Lsn::ZERO)
    }

    pub fn set_lsn(&self, page: PageId, lsn: Lsn) {
        self.inner.lock().insert(page, lsn);
    }

    /// `record.lsn > page.lsn` (spec.md §4.3 redo rule).
    pub fn needs_redo(&self, page: PageId, record_lsn: Lsn) -> bool {
        record_lsn > self.lsn_of(page)
    }
}
