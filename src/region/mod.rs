//! Region & Mutex Substrate (C1, spec.md §4.1).
//!
//! A "region" is the shared memory area that every other subsystem's
//! regions (log buffer, buffer cache, lock table, transaction table) live
//! in. This crate runs in a single OS process (spec.md §5 is explicit that
//! the model is "parallel threads plus cross-process sharing through
//! regions", but true cross-process shared memory is infrastructure this
//! core does not own); we keep the *contract* spec.md §4.1 describes ---
//! attach/detach, a creator flag, a never-rewritten init-flag fingerprint,
//! and mutex allocation --- backed by a process-wide registry keyed by the
//! canonicalized home directory, so every `Environment::open` against the
//! same `home` within one process joins the same region, and a `JOIN` open
//! that requests incompatible flags is rejected exactly as the source
//! does.

pub mod mutex;

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
pub use mutex::{MutexAllocator, MutexFlags, MutexId, RegionMutex};

bitflags::bitflags! {
    /// The subset of `open_flags` (spec.md §4.5.1) that identifies which
    /// subsystems were configured when the region was *created*. Recorded
    /// once in the region header and never rewritten (spec.md §4.1).
    pub struct InitFlags: u32 {
        const CDB      = 0b0000_0001;
        const CDB_ALL_DB = 0b0000_0010;
        const LOCK     = 0b0000_0100;
        const LOG      = 0b0000_1000;
        const MPOOL    = 0b0001_0000;
        const REP      = 0b0010_0000;
        const TXN      = 0b0100_0000;
    }
}

const REGION_MAGIC: u32 = 0x5245_4749; // "REGI"
const REGION_FILE: &str = "__db.001";

struct RegionFileHeader {
    magic: u32,
    init_flags: u32,
}

impl RegionFileHeader {
    fn encode(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        {
            let mut w: &mut [u8] = &mut buf;
            w.write_u32::<LittleEndian>(self.magic).unwrap();
            w.write_u32::<LittleEndian>(self.init_flags).unwrap();
        }
        buf
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        let magic = buf
            .read_u32::<LittleEndian>()
            .map_err(Error::io)?;
        let init_flags = buf
            .read_u32::<LittleEndian>()
            .map_err(Error::io)?;
        if magic != REGION_MAGIC {
            return Err(Error::corruption(REGION_FILE, "bad region magic"));
        }
        Ok(RegionFileHeader { magic, init_flags })
    }
}

/// Shared, process-wide region state. Joiners hold an [`Arc`]; the
/// creator is whichever attach call wins the race to create the backing
/// file.
struct RegionState {
    home: PathBuf,
    init_flags: InitFlags,
    private: bool,
    creator_id: u32,
    mutexes: MutexAllocator,
    joiners: AtomicU32,
}

/// A handle returned by [`attach`]. Dropping it calls [`detach`]
/// implicitly is *not* done (the source requires an explicit `detach`
/// call so errors can be observed); use [`RegionHandle::detach`].
pub struct RegionHandle {
    state: Arc<RegionState>,
    my_id: u32,
}

static NEXT_HANDLE_ID: AtomicU32 = AtomicU32::new(1);

static REGISTRY: Mutex<Option<HashMap<PathBuf, Weak<RegionState>>>> = Mutex::new(None);

fn registry() -> std::sync::MutexGuard<'static, Option<HashMap<PathBuf, Weak<RegionState>>>> {
    let mut guard = REGISTRY.lock().unwrap();
    if guard.is_none() {
        *guard = Some(HashMap::new());
    }
    guard
}

/// Attaches to (creating if necessary) the region rooted at `home`.
///
/// `requested_init_flags` is empty for a `JOIN` open (spec.md §4.5.1 copies
/// the creator's recorded flags into the caller's `open_flags` in that
/// case); for a creating open it is the set of `INIT_*` flags the caller
/// passed. Returns the handle plus the *effective* (recorded) init flags.
pub fn attach(
    home: &Path,
    requested_init_flags: InitFlags,
    private: bool,
) -> Result<(RegionHandle, InitFlags)> {
    fs::create_dir_all(home).map_err(|e| Error::io_at(home, e))?;
    let canon = fs::canonicalize(home).map_err(|e| Error::io_at(home, e))?;

    let mut reg = registry();
    let map = reg.as_mut().unwrap();
    if let Some(existing) = map.get(&canon).and_then(Weak::upgrade) {
        if !requested_init_flags.is_empty() && requested_init_flags != existing.init_flags {
            return Err(Error::InvalidArgument(format!(
                "region at {} was created with {:?}, cannot join with {:?}",
                canon.display(),
                existing.init_flags,
                requested_init_flags
            )));
        }
        let my_id = NEXT_HANDLE_ID.fetch_add(1, Ordering::SeqCst);
        existing.joiners.fetch_add(1, Ordering::SeqCst);
        let flags = existing.init_flags;
        return Ok((
            RegionHandle {
                state: existing,
                my_id,
            },
            flags,
        ));
    }

    let region_path = canon.join(REGION_FILE);
    let init_flags = if region_path.exists() {
        let mut buf = Vec::new();
        fs::File::open(&region_path)
            .and_then(|mut f| f.read_to_end(&mut buf))
            .map_err(|e| Error::io_at(&region_path, e))?;
        let header = RegionFileHeader::decode(&buf)?;
        let recorded = InitFlags::from_bits_truncate(header.init_flags);
        if !requested_init_flags.is_empty() && requested_init_flags != recorded {
            return Err(Error::InvalidArgument(format!(
                "region at {} was created with {:?}, cannot open with {:?}",
                canon.display(),
                recorded,
                requested_init_flags
            )));
        }
        recorded
    } else {
        let header = RegionFileHeader {
            magic: REGION_MAGIC,
            init_flags: requested_init_flags.bits(),
        };
        fs::File::create(&region_path)
            .and_then(|mut f| f.write_all(&header.encode()))
            .map_err(|e| Error::io_at(&region_path, e))?;
        requested_init_flags
    };

    let my_id = NEXT_HANDLE_ID.fetch_add(1, Ordering::SeqCst);
    let state = Arc::new(RegionState {
        home: canon.clone(),
        init_flags,
        private,
        creator_id: my_id,
        mutexes: MutexAllocator::new(),
        joiners: AtomicU32::new(1),
    });
    map.insert(canon, Arc::downgrade(&state));
    Ok((RegionHandle { state, my_id }, init_flags))
}

impl RegionHandle {
    pub fn init_flags(&self) -> InitFlags {
        self.state.init_flags
    }

    pub fn home(&self) -> &Path {
        &self.state.home
    }

    pub fn is_creator(&self) -> bool {
        self.state.creator_id == self.my_id
    }

    pub fn mutex_alloc(&self, flags: MutexFlags) -> RegionMutex {
        self.state.mutexes.alloc(flags)
    }

    pub fn mutex_free(&self, m: RegionMutex) {
        self.state.mutexes.free(m)
    }

    /// Decrements the joiner count; the last detacher of a *private*
    /// region removes its backing file (spec.md §4.1).
    pub fn detach(self) -> Result<()> {
        let remaining = self.state.joiners.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            let canon = self.state.home.clone();
            registry().as_mut().unwrap().remove(&canon);
            if self.state.private {
                let _ = fs::remove_file(canon.join(REGION_FILE));
            }
        }
        Ok(())
    }
}

/// Removes on-disk region backing files under `home`. The only recovery
/// path from a partially initialized region (spec.md §4.1 "Failure"), and
/// also used by `RECOVER*` opens before refresh (spec.md §4.5.1 step 1).
pub fn remove(home: &Path) -> Result<()> {
    let canon = fs::canonicalize(home).unwrap_or_else(|_| home.to_path_buf());
    registry().as_mut().unwrap().retain(|k, _| *k != canon);
    let region_path = home.join(REGION_FILE);
    match fs::remove_file(&region_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io_at(&region_path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creator_is_first_attacher() {
        let dir = tempfile::tempdir().unwrap();
        let (h1, flags) = attach(dir.path(), InitFlags::TXN | InitFlags::LOG, false).unwrap();
        assert!(h1.is_creator());
        assert_eq!(flags, InitFlags::TXN | InitFlags::LOG);

        let (h2, flags2) = attach(dir.path(), InitFlags::empty(), false).unwrap();
        assert!(!h2.is_creator());
        assert_eq!(flags2, flags);
        h1.detach().unwrap();
        h2.detach().unwrap();
    }

    #[test]
    fn incompatible_join_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (h1, _) = attach(dir.path(), InitFlags::TXN, false).unwrap();
        let err = attach(dir.path(), InitFlags::LOCK, false).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        h1.detach().unwrap();
    }
}
