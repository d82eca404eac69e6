//! File-Operation Journal (C4, spec.md §4.4).
//!
//! Gives higher layers atomic, restartable create/remove/rename/write on
//! named files by routing every namespace change through the log first.
//! Shaped like the teacher's `fs/lfs/tx.rs` (every mutating op opens a log
//! transaction bracket before touching the physical filesystem) but files
//! are addressed by name through [`FileTable`] rather than by inode number.

pub mod records;

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::RngCore;

use crate::dispatch::{DispatchCtx, Dispatcher, Opcode};
use crate::error::{Error, Result};
use crate::fid::Fid;
use crate::log::record::Record;
use crate::log::{AppendFlags, LogManager};
use crate::lsn::Lsn;
use crate::pages::{PageId, PageLsnTable};
use crate::txn::{TxnId, TxnTable};

pub use records::AppPathCategory;
use records::*;

/// Whether a named file is backed by real storage or lives only in the
/// in-process name table (spec.md §9 "in-memory-only databases").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    OnDisk,
    InMemory,
}

#[derive(Clone, Debug)]
struct FileEntry {
    fid: Fid,
    category: AppPathCategory,
    backend: BackendKind,
}

/// The directories a name resolves into, by category (spec.md §6
/// "on-disk layout").
#[derive(Clone, Debug)]
pub struct AppDirs {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub tmp_dir: PathBuf,
}

impl AppDirs {
    fn dir_for(&self, category: AppPathCategory) -> &Path {
        match category {
            AppPathCategory::Data => &self.data_dir,
            AppPathCategory::Log => &self.log_dir,
            AppPathCategory::Tmp => &self.tmp_dir,
        }
    }
}

/// The live name -> identity map, plus the handle-lock table that
/// protects every namespace-changing operation (spec.md §4.4, §5).
pub struct FileTable {
    dirs: AppDirs,
    name_to_entry: Mutex<HashMap<String, FileEntry>>,
    locked_names: Mutex<HashSet<String>>,
}

impl FileTable {
    pub fn new(dirs: AppDirs) -> Self {
        FileTable {
            dirs,
            name_to_entry: Mutex::new(HashMap::new()),
            locked_names: Mutex::new(HashSet::new()),
        }
    }

    pub fn path_for(&self, category: AppPathCategory, name: &str) -> PathBuf {
        self.dirs.dir_for(category).join(name)
    }

    /// Acquires the exclusive handle lock on `name` (spec.md §5 "handle-lock
    /// discipline"). Returns [`Error::Busy`] if already held; the caller
    /// retries, it never blocks.
    fn try_lock_name(&self, name: &str) -> Result<()> {
        let mut locked = self.locked_names.lock();
        if !locked.insert(name.to_string()) {
            return Err(Error::Busy(format!("name {name:?} is locked")));
        }
        Ok(())
    }

    fn unlock_name(&self, name: &str) {
        self.locked_names.lock().remove(name);
    }

    fn fid_of(&self, name: &str) -> Option<Fid> {
        self.name_to_entry.lock().get(name).map(|e| e.fid)
    }

    fn entry_of(&self, name: &str) -> Option<FileEntry> {
        self.name_to_entry.lock().get(name).cloned()
    }

    fn register(&self, name: &str, fid: Fid, category: AppPathCategory, backend: BackendKind) {
        self.name_to_entry.lock().insert(
            name.to_string(),
            FileEntry {
                fid,
                category,
                backend,
            },
        );
    }

    /// Registers `name` only if it is not already mapped, without
    /// disturbing an existing mapping (used by the `OPENFILES` recovery
    /// pass, spec.md §4.5.2 Pass B, which must never clobber state built
    /// up by an earlier record in the same pass).
    fn register_if_absent(&self, name: &str, fid: Fid, category: AppPathCategory, backend: BackendKind) {
        self.name_to_entry
            .lock()
            .entry(name.to_string())
            .or_insert(FileEntry {
                fid,
                category,
                backend,
            });
    }

    fn rename_entry(&self, old: &str, new: &str, fid: Fid) {
        let mut map = self.name_to_entry.lock();
        if let Some(mut entry) = map.remove(old) {
            entry.fid = fid;
            map.insert(new.to_string(), entry);
        }
    }

    fn forget(&self, name: &str) {
        self.name_to_entry.lock().remove(name);
    }

    fn fresh_temp_name(name: &str) -> String {
        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        let hex: String = suffix.iter().map(|b| format!("{b:02x}")).collect();
        format!(".{name}.removed.{hex}")
    }
}

/// The C4 subsystem: a [`LogManager`] plus the in-memory bookkeeping that
/// lets its records be turned into filesystem actions (spec.md §4.4).
#[derive(Clone)]
pub struct FileOpJournal {
    log: LogManager,
    txns: Arc<TxnTable>,
    files: Arc<FileTable>,
    pages: Arc<PageLsnTable>,
}

impl FileOpJournal {
    pub fn new(log: LogManager, txns: Arc<TxnTable>, files: Arc<FileTable>, pages: Arc<PageLsnTable>) -> Self {
        FileOpJournal {
            log,
            txns,
            files,
            pages,
        }
    }

    pub fn files(&self) -> &Arc<FileTable> {
        &self.files
    }

    fn append(&self, txn: TxnId, rectype: u32, body: Vec<u8>) -> Result<Lsn> {
        let prev = self.txns.last_lsn(txn)?;
        let lsn = self.log.append(rectype, txn, prev, &body, AppendFlags::empty())?;
        self.txns.set_last_lsn(txn, lsn)?;
        Ok(lsn)
    }

    /// Creates `name` (spec.md §4.4 `FOP_CREATE`): logs first, then performs
    /// the physical (or in-memory) creation, then registers the handle-lock
    /// release for transaction end.
    pub fn create(
        &self,
        txn: TxnId,
        name: &str,
        category: AppPathCategory,
        mode: u32,
        backend: BackendKind,
    ) -> Result<Fid> {
        self.files.try_lock_name(name)?;
        let unlock_name = name.to_string();
        let files = self.files.clone();
        self.txns.on_end(txn, move || files.unlock_name(&unlock_name))?;

        let rectype = match backend {
            BackendKind::OnDisk => FOP_CREATE,
            BackendKind::InMemory => FOP_INMEM_CREATE,
        };
        let fid = Fid::generate();
        let body = match backend {
            BackendKind::OnDisk => FopCreate {
                name: name.to_string(),
                category,
                mode,
            }
            .encode(),
            BackendKind::InMemory => FopInmemCreate {
                name: name.to_string(),
                fid,
                page_size: mode,
            }
            .encode(),
        };
        self.append(txn, rectype, body)?;

        if backend == BackendKind::OnDisk {
            let path = self.files.path_for(category, name);
            create_on_disk(&path, mode)?;
        }
        self.files.register(name, fid, category, backend);
        Ok(fid)
    }

    /// Removes `name` via the rename-and-delete protocol (spec.md §4.4).
    pub fn remove(&self, txn: TxnId, name: &str) -> Result<()> {
        self.files.try_lock_name(name)?;
        let unlock_name = name.to_string();
        let unlock_files = self.files.clone();
        self.txns.on_end(txn, move || unlock_files.unlock_name(&unlock_name))?;

        let entry = self
            .files
            .entry_of(name)
            .ok_or_else(|| Error::NotFound(format!("file {name:?}")))?;

        self.append(
            txn,
            FOP_REMOVE,
            FopRemove {
                name: name.to_string(),
                fid: entry.fid,
                category: entry.category,
            }
            .encode(),
        )?;

        let tmp = FileTable::fresh_temp_name(name);
        self.append(
            txn,
            FOP_RENAME,
            FopRename {
                oldname: name.to_string(),
                newname: tmp.clone(),
                fid: entry.fid,
                category: entry.category,
            }
            .encode(),
        )?;

        if entry.backend == BackendKind::OnDisk {
            let from = self.files.path_for(entry.category, name);
            let to = self.files.path_for(entry.category, &tmp);
            std::fs::rename(&from, &to).map_err(|e| Error::io_at(&from, e))?;
        }
        self.files.rename_entry(name, &tmp, entry.fid);

        let log = self.log.clone();
        let files = self.files.clone();
        let category = entry.category;
        let fid = entry.fid;
        let tmp_for_commit = tmp.clone();
        self.txns.on_commit(txn, move || {
            // Best-effort: a crash between commit and this running is
            // completed by recovery's forward-redo of FOP_FILE_REMOVE
            // (spec.md §4.4 "a create/rename/remove ... is guaranteed to
            // be undone/completed by recovery").
            let _ = log.append(
                FOP_FILE_REMOVE,
                0,
                Lsn::ZERO,
                &FopFileRemove {
                    real_fid: fid,
                    tmp_fid: fid,
                    name: tmp_for_commit.clone(),
                    category,
                    child_txn: None,
                }
                .encode(),
                AppendFlags::DURABLE,
            );
            if entry.backend == BackendKind::OnDisk {
                let path = files.path_for(category, &tmp_for_commit);
                let _ = std::fs::remove_file(&path);
            }
            files.forget(&tmp_for_commit);
        });
        Ok(())
    }

    /// Renames `oldname` to `newname` in place (spec.md §4.4 `FOP_RENAME`,
    /// used directly rather than as part of the remove protocol).
    pub fn rename(&self, txn: TxnId, oldname: &str, newname: &str) -> Result<()> {
        self.files.try_lock_name(oldname)?;
        if let Err(e) = self.files.try_lock_name(newname) {
            self.files.unlock_name(oldname);
            return Err(e);
        }
        let (o, n) = (oldname.to_string(), newname.to_string());
        let files = self.files.clone();
        self.txns.on_end(txn, move || {
            files.unlock_name(&o);
            files.unlock_name(&n);
        })?;

        let entry = self
            .files
            .entry_of(oldname)
            .ok_or_else(|| Error::NotFound(format!("file {oldname:?}")))?;

        let rectype = match entry.backend {
            BackendKind::OnDisk => FOP_RENAME,
            BackendKind::InMemory => FOP_INMEM_RENAME,
        };
        let body = match entry.backend {
            BackendKind::OnDisk => FopRename {
                oldname: oldname.to_string(),
                newname: newname.to_string(),
                fid: entry.fid,
                category: entry.category,
            }
            .encode(),
            BackendKind::InMemory => FopInmemRename {
                oldname: oldname.to_string(),
                newname: newname.to_string(),
                fid: entry.fid,
            }
            .encode(),
        };
        self.append(txn, rectype, body)?;

        if entry.backend == BackendKind::OnDisk {
            let from = self.files.path_for(entry.category, oldname);
            let to = self.files.path_for(entry.category, newname);
            std::fs::rename(&from, &to).map_err(|e| Error::io_at(&from, e))?;
        }
        self.files.rename_entry(oldname, newname, entry.fid);
        Ok(())
    }

    /// Writes `bytes` at `offset` into `name` (spec.md §4.4 `FOP_WRITE`).
    /// Only after-images are logged; undo of an uncommitted write relies
    /// on the matching `FOP_CREATE` undo removing the whole file (every
    /// write in this core targets a file created by the same transaction).
    pub fn write(&self, txn: TxnId, name: &str, offset: u64, bytes: &[u8], flag: u8) -> Result<Lsn> {
        let entry = self
            .files
            .entry_of(name)
            .ok_or_else(|| Error::NotFound(format!("file {name:?}")))?;

        let lsn = self.append(
            txn,
            FOP_WRITE,
            FopWrite {
                name: name.to_string(),
                category: entry.category,
                offset,
                bytes: bytes.to_vec(),
                flag,
            }
            .encode(),
        )?;

        if entry.backend == BackendKind::OnDisk {
            let path = self.files.path_for(entry.category, name);
            write_on_disk(&path, offset, bytes)?;
        }
        self.pages.set_lsn(
            PageId {
                fid: entry.fid,
                offset,
            },
            lsn,
        );
        Ok(lsn)
    }
}

fn create_on_disk(path: &Path, mode: u32) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| Error::io_at(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(mode))
            .map_err(|e| Error::io_at(path, e))?;
    }
    let _ = mode;
    Ok(())
}

fn write_on_disk(path: &Path, offset: u64, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| Error::io_at(path, e))?;
    file.seek(SeekFrom::Start(offset)).map_err(Error::io)?;
    file.write_all(bytes).map_err(Error::io)?;
    Ok(())
}

/// Registers every FOP handler on `dispatcher` (spec.md §4.3/§4.4).
pub fn register_handlers(dispatcher: &mut Dispatcher) {
    dispatcher.register(FOP_CREATE, handle_create);
    dispatcher.register(FOP_REMOVE, handle_remove);
    dispatcher.register(FOP_WRITE, handle_write);
    dispatcher.register(FOP_RENAME, handle_rename);
    dispatcher.register(FOP_FILE_REMOVE, handle_file_remove);
    dispatcher.register(FOP_INMEM_CREATE, handle_inmem_create);
    dispatcher.register(FOP_INMEM_REMOVE, handle_inmem_remove);
    dispatcher.register(FOP_INMEM_RENAME, handle_inmem_rename);
}

fn print_body(prefix: &str, record: &Record, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    if let Some(out) = ctx.print_out.as_deref_mut() {
        use std::io::Write as _;
        writeln!(out, "{prefix} txnid={} body_len={}", record.txnid, record.body.len())
            .map_err(Error::io)?;
    }
    Ok(())
}

fn is_relocated(ctx: &DispatchCtx<'_>, name: &str) -> bool {
    ctx.relocated_names.map_or(false, |set| set.contains(name))
}

fn handle_create(record: &Record, _lsn: Lsn, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    let body = FopCreate::decode(&record.body)?;
    match ctx.opcode {
        Opcode::Print => print_body("FOP_CREATE", record, ctx),
        Opcode::ApplyForwardOpenFiles => {
            // `FOP_CREATE` carries no fid of its own (spec.md §4.4: it is
            // assigned fresh at create time). If the log later renames
            // this name away, the real fid is the one carried by that
            // `FOP_RENAME`/`FOP_REMOVE` record, registered when this pass
            // reaches it; registering a throwaway random fid here first
            // would just be a stale entry under a name nothing else ever
            // matches against.
            if !is_relocated(ctx, &body.name) {
                ctx.file_table
                    .register_if_absent(&body.name, Fid::generate(), body.category, BackendKind::OnDisk);
            }
            Ok(())
        }
        Opcode::ApplyForwardNormal => {
            if is_relocated(ctx, &body.name) {
                return Ok(());
            }
            let path = ctx.file_table.path_for(body.category, &body.name);
            if !path.exists() {
                create_on_disk(&path, body.mode)?;
            }
            if ctx.file_table.fid_of(&body.name).is_none() {
                ctx.file_table
                    .register(&body.name, Fid::generate(), body.category, BackendKind::OnDisk);
            }
            Ok(())
        }
        Opcode::ApplyBackwardRollback | Opcode::ApplyBackwardRecover => {
            let path = ctx.file_table.path_for(body.category, &body.name);
            let _ = std::fs::remove_file(&path);
            ctx.file_table.forget(&body.name);
            Ok(())
        }
        Opcode::GetPages => Ok(()),
    }
}

fn handle_remove(record: &Record, _lsn: Lsn, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    let _body = FopRemove::decode(&record.body)?;
    match ctx.opcode {
        Opcode::Print => print_body("FOP_REMOVE", record, ctx),
        // The physical effect lives entirely in the FOP_RENAME /
        // FOP_FILE_REMOVE records that bracket this one; FOP_REMOVE is an
        // audit marker only (spec.md §4.4 "rename-and-delete").
        _ => Ok(()),
    }
}

fn handle_write(record: &Record, lsn: Lsn, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    let body = FopWrite::decode(&record.body)?;
    match ctx.opcode {
        Opcode::Print => print_body("FOP_WRITE", record, ctx),
        Opcode::ApplyForwardOpenFiles => Ok(()),
        Opcode::ApplyForwardNormal => {
            let Some(fid) = ctx.file_table.fid_of(&body.name) else {
                return Ok(());
            };
            let page = PageId {
                fid,
                offset: body.offset,
            };
            if ctx.pages.needs_redo(page, lsn) {
                let path = ctx.file_table.path_for(body.category, &body.name);
                write_on_disk(&path, body.offset, &body.bytes)?;
                ctx.pages.set_lsn(page, lsn);
            }
            Ok(())
        }
        // No before-image is logged; undoing the owning FOP_CREATE removes
        // the whole file, so a write undo has nothing left to do.
        Opcode::ApplyBackwardRollback | Opcode::ApplyBackwardRecover => Ok(()),
        Opcode::GetPages => {
            if let Some(fid) = ctx.file_table.fid_of(&body.name) {
                if let Some(out) = ctx.getpages_out.as_deref_mut() {
                    out.push(PageId {
                        fid,
                        offset: body.offset,
                    });
                }
            }
            Ok(())
        }
    }
}

fn handle_rename(record: &Record, _lsn: Lsn, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    let body = FopRename::decode(&record.body)?;
    match ctx.opcode {
        Opcode::Print => print_body("FOP_RENAME", record, ctx),
        Opcode::ApplyForwardOpenFiles => {
            ctx.file_table
                .register_if_absent(&body.newname, body.fid, body.category, BackendKind::OnDisk);
            Ok(())
        }
        Opcode::ApplyForwardNormal => {
            let matches = ctx.file_table.fid_of(&body.oldname).map_or(true, |f| f == body.fid);
            if !matches {
                return Ok(());
            }
            let from = ctx.file_table.path_for(body.category, &body.oldname);
            let to = ctx.file_table.path_for(body.category, &body.newname);
            if from.exists() {
                std::fs::rename(&from, &to).map_err(|e| Error::io_at(&from, e))?;
            }
            ctx.file_table.rename_entry(&body.oldname, &body.newname, body.fid);
            Ok(())
        }
        Opcode::ApplyBackwardRollback | Opcode::ApplyBackwardRecover => {
            let matches = ctx.file_table.fid_of(&body.newname).map_or(true, |f| f == body.fid);
            if !matches {
                return Ok(());
            }
            let from = ctx.file_table.path_for(body.category, &body.newname);
            let to = ctx.file_table.path_for(body.category, &body.oldname);
            if from.exists() {
                std::fs::rename(&from, &to).map_err(|e| Error::io_at(&from, e))?;
            }
            ctx.file_table.rename_entry(&body.newname, &body.oldname, body.fid);
            Ok(())
        }
        Opcode::GetPages => Ok(()),
    }
}

fn handle_file_remove(record: &Record, _lsn: Lsn, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    let body = FopFileRemove::decode(&record.body)?;
    match ctx.opcode {
        Opcode::Print => print_body("FOP_FILE_REMOVE", record, ctx),
        Opcode::ApplyForwardOpenFiles => Ok(()),
        Opcode::ApplyForwardNormal => {
            let path = ctx.file_table.path_for(body.category, &body.name);
            let _ = std::fs::remove_file(&path);
            ctx.file_table.forget(&body.name);
            Ok(())
        }
        // Only ever logged from an at-commit callback, so it never
        // belongs to a loser transaction; tolerated as a no-op.
        Opcode::ApplyBackwardRollback | Opcode::ApplyBackwardRecover => Ok(()),
        Opcode::GetPages => Ok(()),
    }
}

fn handle_inmem_create(record: &Record, _lsn: Lsn, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    let body = FopInmemCreate::decode(&record.body)?;
    match ctx.opcode {
        Opcode::Print => print_body("FOP_INMEM_CREATE", record, ctx),
        Opcode::ApplyForwardOpenFiles | Opcode::ApplyForwardNormal => {
            ctx.file_table
                .register_if_absent(&body.name, body.fid, AppPathCategory::Data, BackendKind::InMemory);
            Ok(())
        }
        Opcode::ApplyBackwardRollback | Opcode::ApplyBackwardRecover => {
            ctx.file_table.forget(&body.name);
            Ok(())
        }
        Opcode::GetPages => Ok(()),
    }
}

fn handle_inmem_remove(record: &Record, _lsn: Lsn, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    let body = FopInmemRemove::decode(&record.body)?;
    match ctx.opcode {
        Opcode::Print => print_body("FOP_INMEM_REMOVE", record, ctx),
        Opcode::ApplyForwardOpenFiles => Ok(()),
        Opcode::ApplyForwardNormal => {
            ctx.file_table.forget(&body.name);
            Ok(())
        }
        Opcode::ApplyBackwardRollback | Opcode::ApplyBackwardRecover => {
            ctx.file_table
                .register_if_absent(&body.name, body.fid, AppPathCategory::Data, BackendKind::InMemory);
            Ok(())
        }
        Opcode::GetPages => Ok(()),
    }
}

fn handle_inmem_rename(record: &Record, _lsn: Lsn, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    let body = FopInmemRename::decode(&record.body)?;
    match ctx.opcode {
        Opcode::Print => print_body("FOP_INMEM_RENAME", record, ctx),
        Opcode::ApplyForwardOpenFiles => {
            ctx.file_table
                .register_if_absent(&body.newname, body.fid, AppPathCategory::Data, BackendKind::InMemory);
            Ok(())
        }
        Opcode::ApplyForwardNormal => {
            ctx.file_table.rename_entry(&body.oldname, &body.newname, body.fid);
            Ok(())
        }
        Opcode::ApplyBackwardRollback | Opcode::ApplyBackwardRecover => {
            ctx.file_table.rename_entry(&body.newname, &body.oldname, body.fid);
            Ok(())
        }
        Opcode::GetPages => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;

    fn dirs(root: &Path) -> AppDirs {
        let data = root.join("data");
        let log = root.join("log");
        let tmp = root.join("tmp");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::create_dir_all(&log).unwrap();
        std::fs::create_dir_all(&tmp).unwrap();
        AppDirs {
            data_dir: data,
            log_dir: log,
            tmp_dir: tmp,
        }
    }

    fn journal(root: &Path) -> (FileOpJournal, Arc<TxnTable>, Arc<FileTable>) {
        let log = LogManager::open(&root.join("log_segments"), 1 << 20, 1).unwrap();
        let txns = Arc::new(TxnTable::new());
        let files = Arc::new(FileTable::new(dirs(root)));
        let pages = Arc::new(PageLsnTable::new());
        (FileOpJournal::new(log, txns.clone(), files.clone(), pages), txns, files)
    }

    #[test]
    fn create_then_write_survives_in_table() {
        let dir = tempfile::tempdir().unwrap();
        let (fop, txns, files) = journal(dir.path());
        let txn = txns.begin(None).unwrap();
        let fid = fop
            .create(txn, "a.db", AppPathCategory::Data, 0o600, BackendKind::OnDisk)
            .unwrap();
        fop.write(txn, "a.db", 0, &[0x41, 0x42], 0).unwrap();
        txns.commit(txn).unwrap();

        assert_eq!(files.fid_of("a.db"), Some(fid));
        let contents = std::fs::read(files.path_for(AppPathCategory::Data, "a.db")).unwrap();
        assert_eq!(&contents[..2], &[0x41, 0x42]);
    }

    #[test]
    fn remove_renames_away_then_unlinks_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let (fop, txns, files) = journal(dir.path());
        let txn = txns.begin(None).unwrap();
        fop.create(txn, "b.db", AppPathCategory::Data, 0o600, BackendKind::OnDisk)
            .unwrap();
        txns.commit(txn).unwrap();

        let txn2 = txns.begin(None).unwrap();
        fop.remove(txn2, "b.db").unwrap();
        assert!(!files.path_for(AppPathCategory::Data, "b.db").exists());
        txns.commit(txn2).unwrap();

        assert!(files.fid_of("b.db").is_none());
    }

    #[test]
    fn name_lock_rejects_concurrent_create() {
        let dir = tempfile::tempdir().unwrap();
        let (fop, txns, _files) = journal(dir.path());
        let t1 = txns.begin(None).unwrap();
        fop.create(t1, "c.db", AppPathCategory::Data, 0o600, BackendKind::OnDisk)
            .unwrap();
        let t2 = txns.begin(None).unwrap();
        let err = fop
            .create(t2, "c.db", AppPathCategory::Data, 0o600, BackendKind::OnDisk)
            .unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
    }

    #[test]
    fn redo_recreates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (fop, txns, files) = journal(dir.path());
        let txn = txns.begin(None).unwrap();
        fop.create(txn, "d.db", AppPathCategory::Data, 0o600, BackendKind::OnDisk)
            .unwrap();
        txns.commit(txn).unwrap();
        std::fs::remove_file(files.path_for(AppPathCategory::Data, "d.db")).unwrap();

        let mut dispatcher = Dispatcher::new();
        register_handlers(&mut dispatcher);
        let log = LogManager::open(&dir.path().join("log_segments"), 1 << 20, 1).unwrap();
        let txns2 = TxnTable::new();
        let pages = PageLsnTable::new();
        let mut cur = log.cursor();
        let record = cur.first().unwrap();
        let mut ctx = DispatchCtx {
            opcode: Opcode::ApplyForwardNormal,
            file_table: &files,
            log: &log,
            txns: &txns2,
            pages: &pages,
            getpages_out: None,
            print_out: None,
            relocated_names: None,
        };
        dispatcher.dispatch(&record, cur.position().unwrap(), &mut ctx).unwrap();
        assert!(files.path_for(AppPathCategory::Data, "d.db").exists());
    }
}
