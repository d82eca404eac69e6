//! Environment & Recovery Driver (C5, spec.md §4.5).
//!
//! Orchestrates startup, configuration, recovery, and shutdown, the way
//! the teacher's `fs/ufs/log.rs` + `fs/lfs/tx.rs` together orchestrate a
//! single filesystem's mount/begin_op/end_op/unmount lifecycle, generalized
//! from one on-disk filesystem to an arbitrary set of named files.

pub mod builtin;
pub mod config;
pub mod flags;
pub mod recovery;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use config::DbConfig;
pub use flags::OpenFlags;

use crate::dispatch::{DispatchCtx, Dispatcher, Handler, Opcode};
use crate::error::{Error, Result};
use crate::fop::{AppDirs, FileOpJournal, FileTable};
use crate::interrupt::InterruptFlag;
use crate::log::record::Record;
use crate::log::{AppendFlags, LogManager};
use crate::lsn::Lsn;
use crate::pages::{PageId, PageLsnTable};
use crate::panic_flag::PanicFlag;
use crate::region::{self, InitFlags, RegionHandle};
use crate::txn::{TxnId, TxnTable};

use builtin::RECTYPE_COMMIT;

const DEFAULT_SEGMENT_MAX: u32 = 10 * 1024 * 1024;

fn region_init_flags(flags: OpenFlags) -> InitFlags {
    let mut out = InitFlags::empty();
    if flags.contains(OpenFlags::INIT_CDB) {
        out |= InitFlags::CDB;
    }
    if flags.contains(OpenFlags::INIT_LOCK) {
        out |= InitFlags::LOCK;
    }
    if flags.contains(OpenFlags::INIT_LOG) {
        out |= InitFlags::LOG;
    }
    if flags.contains(OpenFlags::INIT_MPOOL) {
        out |= InitFlags::MPOOL;
    }
    if flags.contains(OpenFlags::INIT_REP) {
        out |= InitFlags::REP;
    }
    if flags.contains(OpenFlags::INIT_TXN) {
        out |= InitFlags::TXN;
    }
    out
}

/// A single open database environment: the region handle plus every
/// subsystem built on top of it (spec.md §3 "Environment").
pub struct Environment {
    home: PathBuf,
    region: RegionHandle,
    log: LogManager,
    txns: Arc<TxnTable>,
    files: Arc<FileTable>,
    pages: Arc<PageLsnTable>,
    fop: FileOpJournal,
    dispatcher: Arc<Dispatcher>,
    open_flags: OpenFlags,
    panicked: PanicFlag,
    interrupt: InterruptFlag,
}

impl Environment {
    /// Opens (or creates) the environment rooted at `home_dir` (spec.md
    /// §4.5.1). `app_handler` is registered for any `rectype >=
    /// APPLICATION_RECTYPE_BASE` with no dedicated registration (spec.md
    /// §6).
    pub fn open(home_dir: &Path, open_flags: OpenFlags, app_handler: Option<Handler>) -> Result<Self> {
        open_flags.preflight()?;

        if open_flags.is_recover() {
            region::remove(home_dir)?;
        }

        let config = DbConfig::load(home_dir)?;
        let dirs = AppDirs {
            data_dir: config.data_dir().map(PathBuf::from).unwrap_or_else(|| home_dir.to_path_buf()),
            log_dir: config.lg_dir().map(PathBuf::from).unwrap_or_else(|| home_dir.to_path_buf()),
            tmp_dir: config.tmp_dir().map(PathBuf::from).unwrap_or_else(|| home_dir.to_path_buf()),
        };
        std::fs::create_dir_all(&dirs.data_dir).map_err(|e| Error::io_at(&dirs.data_dir, e))?;
        std::fs::create_dir_all(&dirs.tmp_dir).map_err(|e| Error::io_at(&dirs.tmp_dir, e))?;

        let requested = region_init_flags(open_flags);
        let private = open_flags.contains(OpenFlags::PRIVATE);
        let (region, effective) = region::attach(home_dir, requested, private)?;
        let mut open_flags = open_flags;
        if open_flags.contains(OpenFlags::JOIN) {
            open_flags = apply_effective(open_flags, effective);
        }
        let was_creator = region.is_creator();

        // spec.md §4.5.1 "On any error after region creation": panic,
        // detach, remove region files. `?` below runs the guard; success
        // defuses it.
        let cleanup = scopeguard::guard(home_dir.to_path_buf(), |home| {
            let _ = region::remove(&home);
        });
        let env = Self::open_inner(home_dir, &dirs, open_flags, region, app_handler, was_creator, &config)?;
        scopeguard::ScopeGuard::into_inner(cleanup);
        Ok(env)
    }

    fn open_inner(
        home_dir: &Path,
        dirs: &AppDirs,
        open_flags: OpenFlags,
        region: RegionHandle,
        app_handler: Option<Handler>,
        was_creator: bool,
        config: &DbConfig,
    ) -> Result<Self> {
        let segment_max = config.lg_max()?.unwrap_or(DEFAULT_SEGMENT_MAX);
        let log = LogManager::open(&dirs.log_dir, segment_max, 1)?;

        let txns = Arc::new(TxnTable::new());
        let files = Arc::new(FileTable::new(dirs.clone()));
        let pages = Arc::new(PageLsnTable::new());

        let mut dispatcher = Dispatcher::new();
        if open_flags.contains(OpenFlags::INIT_TXN) {
            crate::fop::register_handlers(&mut dispatcher);
            builtin::register_handlers(&mut dispatcher);
        }
        if let Some(handler) = app_handler {
            dispatcher.register_application_handler(handler);
        }
        let dispatcher = Arc::new(dispatcher);

        let fop = FileOpJournal::new(log.refresh(), txns.clone(), files.clone(), pages.clone());
        let interrupt = InterruptFlag::new();
        let panicked = PanicFlag::new();

        let recovered = if open_flags.is_recover() {
            recovery::run(&log, &dispatcher, &files, &pages, &interrupt, &panicked)?;
            true
        } else {
            false
        };

        if open_flags.contains(OpenFlags::INIT_TXN) && was_creator && !recovered {
            let body = builtin::TxnIdResetBody { floor: 1 }.encode();
            log.append(builtin::RECTYPE_TXN_ID_RESET, 0, Lsn::ZERO, &body, AppendFlags::DURABLE)?;
        }

        Ok(Environment {
            home: home_dir.to_path_buf(),
            region,
            log,
            txns,
            files,
            pages,
            fop,
            dispatcher,
            open_flags,
            panicked,
            interrupt,
        })
    }

    pub fn is_panicked(&self) -> bool {
        self.panicked.is_set()
    }

    fn check_panicked(&self) -> Result<()> {
        if self.is_panicked() {
            return Err(Error::Panic);
        }
        Ok(())
    }

    pub fn interrupt_handle(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    pub fn fop(&self) -> &FileOpJournal {
        &self.fop
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Begins a transaction (optionally nested under `parent`), bracket-
    /// style with [`Self::end_op`] (spec.md §4.5.3, SPEC_FULL.md ambient
    /// `begin_op`/`end_op` bracketing).
    pub fn begin_op(&self, parent: Option<TxnId>) -> Result<TxnId> {
        self.check_panicked()?;
        self.txns.begin(parent)
    }

    /// Ends a transaction begun with [`Self::begin_op`], committing it
    /// (and logging the commit record under the write-ahead rule) or
    /// aborting it via a logical backward walk of its own record chain.
    pub fn end_op(&self, txn: TxnId, commit: bool) -> Result<()> {
        self.check_panicked()?;
        if commit {
            self.commit_txn(txn)
        } else {
            self.abort_txn(txn)
        }
    }

    fn commit_txn(&self, txn: TxnId) -> Result<()> {
        self.poisoning(|| {
            let prev = self.txns.last_lsn(txn)?;
            let lsn = self.log.append(RECTYPE_COMMIT, txn, prev, &[], AppendFlags::DURABLE)?;
            self.txns.set_last_lsn(txn, lsn)?;
            self.txns.commit(txn)
        })
    }

    /// Live-transaction abort (spec.md §5 "Deadlock"/§4.3): walks this
    /// transaction's own record chain backward by `prev_lsn`, distinct
    /// from crash recovery's Pass D, which physically scans the whole log.
    fn abort_txn(&self, txn: TxnId) -> Result<()> {
        self.poisoning(|| {
            let mut lsn = self.txns.last_lsn(txn)?;
            let mut ctx = DispatchCtx {
                opcode: Opcode::ApplyBackwardRollback,
                file_table: &self.files,
                log: &self.log,
                txns: &self.txns,
                pages: &self.pages,
                getpages_out: None,
                print_out: None,
                relocated_names: None,
            };
            while !lsn.is_zero() {
                let (record, _) = self.log.read_at(lsn)?;
                self.dispatcher.dispatch(&record, lsn, &mut ctx)?;
                lsn = record.prev_lsn;
            }
            self.txns.abort(txn)
        })
    }

    /// Runs `f`, poisoning the environment if it fails (spec.md §7: once a
    /// live commit/abort can't complete, every later call must see
    /// [`Error::Panic`] rather than limp along on a half-applied log).
    fn poisoning<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        f().map_err(|e| {
            self.panicked.set();
            e
        })
    }

    /// Returns the pages a single record touches, by dispatching it with
    /// [`Opcode::GetPages`] (spec.md §4.3). Used to order page locks before
    /// applying a record's effects; a `FOP_WRITE` is the only record type
    /// in this core that answers with anything.
    pub fn get_pages(&self, record: &Record, lsn: Lsn) -> Result<Vec<PageId>> {
        self.check_panicked()?;
        let mut out = Vec::new();
        let mut ctx = DispatchCtx {
            opcode: Opcode::GetPages,
            file_table: &self.files,
            log: &self.log,
            txns: &self.txns,
            pages: &self.pages,
            getpages_out: Some(&mut out),
            print_out: None,
            relocated_names: None,
        };
        self.dispatcher.dispatch(record, lsn, &mut ctx)?;
        Ok(out)
    }

    /// Dumps every record in the log in order (spec.md §4.3 `PRINT`, §6
    /// "log-dump utility").
    pub fn print_log(&self, out: &mut dyn Write) -> Result<()> {
        let mut cur = self.log.cursor();
        let mut record = match cur.first() {
            Ok(r) => r,
            Err(_) => return Ok(()), // empty log
        };
        let mut ctx = DispatchCtx {
            opcode: Opcode::Print,
            file_table: &self.files,
            log: &self.log,
            txns: &self.txns,
            pages: &self.pages,
            getpages_out: None,
            print_out: Some(out),
            relocated_names: None,
        };
        loop {
            let lsn = cur.position().unwrap();
            self.dispatcher.dispatch(&record, lsn, &mut ctx)?;
            record = match cur.next() {
                Ok(r) => r,
                Err(_) => break,
            };
        }
        Ok(())
    }

    /// Closes the environment (spec.md §4.5.3). Fails with
    /// [`Error::HandlesOpen`] if any transaction is still active; the
    /// environment is left usable so a later close can succeed once the
    /// caller ends its transactions.
    pub fn close(self) -> Result<()> {
        if !self.txns.active_ids().is_empty() {
            return Err(Error::HandlesOpen);
        }
        self.region.detach()
    }

    /// Hands back a fresh handle to the same environment without tearing
    /// down its log or in-memory state (spec.md §4.5.1 step 1, "refresh").
    pub fn refresh(&self) -> Result<Environment> {
        let private = self.open_flags.contains(OpenFlags::PRIVATE);
        let (region, _) = region::attach(&self.home, InitFlags::empty(), private)?;
        Ok(Environment {
            home: self.home.clone(),
            region,
            log: self.log.refresh(),
            txns: self.txns.clone(),
            files: self.files.clone(),
            pages: self.pages.clone(),
            fop: self.fop.clone(),
            dispatcher: self.dispatcher.clone(),
            open_flags: self.open_flags,
            // A fresh handle starts unpoisoned even if `self` was (spec.md
            // §7: "until the environment is refreshed or removed").
            panicked: PanicFlag::new(),
            interrupt: self.interrupt.clone(),
        })
    }

    /// Removes the on-disk region files under `home_dir` without touching
    /// log segments or user data (spec.md §4.5.1 step 1, §4.1 "Failure").
    pub fn remove(home_dir: &Path) -> Result<()> {
        region::remove(home_dir)
    }
}

fn apply_effective(mut flags: OpenFlags, effective: InitFlags) -> OpenFlags {
    flags.set(OpenFlags::INIT_CDB, effective.contains(InitFlags::CDB));
    flags.set(OpenFlags::INIT_LOCK, effective.contains(InitFlags::LOCK));
    flags.set(OpenFlags::INIT_LOG, effective.contains(InitFlags::LOG));
    flags.set(OpenFlags::INIT_MPOOL, effective.contains(InitFlags::MPOOL));
    flags.set(OpenFlags::INIT_REP, effective.contains(InitFlags::REP));
    flags.set(OpenFlags::INIT_TXN, effective.contains(InitFlags::TXN));
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fop::{AppPathCategory, BackendKind};

    fn open_flags() -> OpenFlags {
        OpenFlags::CREATE | OpenFlags::INIT_TXN | OpenFlags::INIT_LOG | OpenFlags::INIT_MPOOL
    }

    #[test]
    fn clean_create_then_close() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::open(dir.path(), open_flags(), None).unwrap();
        env.close().unwrap();
    }

    #[test]
    fn committed_write_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let env = Environment::open(dir.path(), open_flags(), None).unwrap();
            let txn = env.begin_op(None).unwrap();
            env.fop()
                .create(txn, "a.db", AppPathCategory::Data, 0o600, BackendKind::OnDisk)
                .unwrap();
            env.fop().write(txn, "a.db", 0, &[0x41, 0x42], 0).unwrap();
            env.end_op(txn, true).unwrap();
            env.close().unwrap();
        }
        {
            let env = Environment::open(dir.path(), open_flags() | OpenFlags::RECOVER, None).unwrap();
            let contents = std::fs::read(env.files.path_for(AppPathCategory::Data, "a.db")).unwrap();
            assert_eq!(&contents[..2], &[0x41, 0x42]);
            env.close().unwrap();
        }
    }

    #[test]
    fn uncommitted_create_is_rolled_back_live() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::open(dir.path(), open_flags(), None).unwrap();
        let txn = env.begin_op(None).unwrap();
        env.fop()
            .create(txn, "b.db", AppPathCategory::Data, 0o600, BackendKind::OnDisk)
            .unwrap();
        assert!(env.files.path_for(AppPathCategory::Data, "b.db").exists());
        env.end_op(txn, false).unwrap();
        assert!(!env.files.path_for(AppPathCategory::Data, "b.db").exists());
        env.close().unwrap();
    }

    #[test]
    fn close_with_active_txn_fails() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::open(dir.path(), open_flags(), None).unwrap();
        let _txn = env.begin_op(None).unwrap();
        let err = env.close().err().unwrap();
        assert!(matches!(err, Error::HandlesOpen));
    }

    #[test]
    fn get_pages_reports_write_target() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::open(dir.path(), open_flags(), None).unwrap();
        let txn = env.begin_op(None).unwrap();
        env.fop()
            .create(txn, "c.db", AppPathCategory::Data, 0o600, BackendKind::OnDisk)
            .unwrap();
        let lsn = env.fop().write(txn, "c.db", 0, &[9, 9], 0).unwrap();
        env.end_op(txn, true).unwrap();

        let (record, _) = env.log.read_at(lsn).unwrap();
        let pages = env.get_pages(&record, lsn).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].offset, 0);
        env.close().unwrap();
    }

    #[test]
    fn failed_commit_poisons_environment() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::open(dir.path(), open_flags(), None).unwrap();
        assert!(!env.is_panicked());

        let err = env.end_op(999_999, true).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(env.is_panicked());

        let err = env.begin_op(None).unwrap_err();
        assert!(matches!(err, Error::Panic));
    }

    #[test]
    fn refresh_clears_poison() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::open(dir.path(), open_flags(), None).unwrap();
        let _ = env.end_op(999_999, true).unwrap_err();
        assert!(env.is_panicked());

        let refreshed = env.refresh().unwrap();
        assert!(!refreshed.is_panicked());
        refreshed.close().unwrap();
    }
}
