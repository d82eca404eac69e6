//! The four-pass recovery driver (spec.md §4.5.2).

use std::collections::HashSet;

use crate::dispatch::{DispatchCtx, Dispatcher, Opcode};
use crate::error::{Error, Result};
use crate::fop::records::{FopRename, FOP_RENAME};
use crate::fop::FileTable;
use crate::interrupt::InterruptFlag;
use crate::log::LogManager;
use crate::lsn::Lsn;
use crate::pages::PageLsnTable;
use crate::panic_flag::PanicFlag;
use crate::txn::{TxnId, TxnTable};

use super::builtin::{CheckpointBody, RECTYPE_CHECKPOINT, RECTYPE_COMMIT};

/// Runs passes A-D against `log`, mutating `file_table`/`pages` and the
/// transaction-id floor of `txns` as it goes. `txns` should be an otherwise
/// empty table: recovery populates it only transiently, to resolve loser
/// transactions, and the environment gets a cleared table once recovery
/// completes (no transaction survives a recovery run). `poison` is set if
/// any pass hits a non-tolerated error, mirroring the policy in
/// [`crate::error`].
pub fn run(
    log: &LogManager,
    dispatcher: &Dispatcher,
    file_table: &FileTable,
    pages: &PageLsnTable,
    interrupt: &InterruptFlag,
    poison: &PanicFlag,
) -> Result<()> {
    let Some(end) = log.last_lsn()? else {
        return Ok(()); // empty log: nothing to recover.
    };
    let Some(log_start) = log.first_lsn()? else {
        return Ok(());
    };

    let start = find_start(log, log_start, end)?;
    let relocated = collect_relocated_names(log, start, end)?;

    let txns = TxnTable::new();
    let mut ctx = DispatchCtx {
        opcode: Opcode::ApplyForwardOpenFiles,
        file_table,
        log,
        txns: &txns,
        pages,
        getpages_out: None,
        print_out: None,
        relocated_names: Some(&relocated),
    };
    forward_pass(log, start, end, dispatcher, &mut ctx, interrupt, poison)?;

    ctx.opcode = Opcode::ApplyForwardNormal;
    forward_pass(log, start, end, dispatcher, &mut ctx, interrupt, poison)?;

    let losers = find_losers(log, start, end)?;
    ctx.opcode = Opcode::ApplyBackwardRecover;
    backward_pass(log, start, end, dispatcher, &mut ctx, &losers, interrupt, poison)?;

    Ok(())
}

/// Pass-B/C prescan: every name that is ever the source of an on-disk
/// rename in `[start, end]`. `FOP_CREATE`'s recovery handler consults this
/// to skip recreating a name the log itself relocates later in the same
/// range — the rename-and-delete protocol (spec.md §4.4) means the remove
/// path goes through this too, since a remove is logged as a rename to a
/// temporary name followed by `FOP_FILE_REMOVE`.
fn collect_relocated_names(log: &LogManager, start: Lsn, end: Lsn) -> Result<HashSet<String>> {
    let mut cur = log.cursor();
    let mut record = cur.set(start)?;
    let mut relocated = HashSet::new();
    loop {
        if record.rectype == FOP_RENAME {
            let body = FopRename::decode(&record.body)?;
            relocated.insert(body.oldname);
        }
        let lsn = cur.position().unwrap();
        if lsn == end {
            break;
        }
        record = cur.next()?;
    }
    Ok(relocated)
}

/// Pass A: walk backward looking for a checkpoint whose referenced oldest
/// active LSN is still present in the log; otherwise start at the log's
/// first LSN (spec.md §4.5.2 Pass A).
fn find_start(log: &LogManager, log_start: Lsn, end: Lsn) -> Result<Lsn> {
    let mut cur = log.cursor();
    let mut record = cur.set(end)?;
    loop {
        if record.rectype == RECTYPE_CHECKPOINT {
            let body = CheckpointBody::decode(&record.body)?;
            if body.oldest_active_lsn >= log_start {
                return Ok(body.oldest_active_lsn);
            }
        }
        if cur.position().unwrap() == log_start {
            return Ok(log_start);
        }
        record = cur.prev()?;
    }
}

fn forward_pass(
    log: &LogManager,
    start: Lsn,
    end: Lsn,
    dispatcher: &Dispatcher,
    ctx: &mut DispatchCtx<'_>,
    interrupt: &InterruptFlag,
    poison: &PanicFlag,
) -> Result<()> {
    let mut cur = log.cursor();
    let mut record = cur.set(start)?;
    loop {
        if interrupt.is_set() {
            return Err(Error::Interrupted);
        }
        let lsn = cur.position().unwrap();
        match dispatcher.dispatch(&record, lsn, ctx) {
            Ok(()) => {}
            Err(e) if e.tolerated_during_recovery() => {}
            Err(e) => {
                poison.set();
                return Err(e);
            }
        }
        if lsn == end {
            break;
        }
        record = cur.next()?;
    }
    Ok(())
}

fn find_losers(log: &LogManager, start: Lsn, end: Lsn) -> Result<HashSet<TxnId>> {
    let mut cur = log.cursor();
    let mut record = cur.set(start)?;
    let mut seen = HashSet::new();
    let mut committed = HashSet::new();
    loop {
        if record.rectype == RECTYPE_COMMIT {
            committed.insert(record.txnid);
        } else {
            seen.insert(record.txnid);
        }
        let lsn = cur.position().unwrap();
        if lsn == end {
            break;
        }
        record = cur.next()?;
    }
    Ok(seen.difference(&committed).copied().collect())
}

fn backward_pass(
    log: &LogManager,
    start: Lsn,
    end: Lsn,
    dispatcher: &Dispatcher,
    ctx: &mut DispatchCtx<'_>,
    losers: &HashSet<TxnId>,
    interrupt: &InterruptFlag,
    poison: &PanicFlag,
) -> Result<()> {
    let mut cur = log.cursor();
    let mut record = cur.set(end)?;
    loop {
        if interrupt.is_set() {
            return Err(Error::Interrupted);
        }
        let lsn = cur.position().unwrap();
        if losers.contains(&record.txnid) {
            match dispatcher.dispatch(&record, lsn, ctx) {
                Ok(()) => {}
                Err(e) if e.tolerated_during_recovery() => {}
                Err(e) => {
                    poison.set();
                    return Err(e);
                }
            }
        }
        if lsn == start {
            break;
        }
        record = cur.prev()?;
    }
    Ok(())
}
