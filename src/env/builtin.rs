//! Built-in (non-FOP) record types: transaction commit markers,
//! checkpoints, and the transaction-id reset record (spec.md §4.5.1 step 6,
//! §4.5.2 Pass A, §8 invariant 2).
//!
//! Numbered well clear of both the FOP rectypes (1..=8, see
//! [`crate::fop::records`]) and [`crate::log::record::APPLICATION_RECTYPE_BASE`].

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::dispatch::{DispatchCtx, Dispatcher, Opcode};
use crate::error::{Error, Result};
use crate::log::record::Record;
use crate::lsn::Lsn;

pub const RECTYPE_COMMIT: u32 = 101;
pub const RECTYPE_CHECKPOINT: u32 = 102;
pub const RECTYPE_TXN_ID_RESET: u32 = 103;

pub struct CheckpointBody {
    pub oldest_active_lsn: Lsn,
}

impl CheckpointBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.write_u32::<LittleEndian>(self.oldest_active_lsn.file).unwrap();
        buf.write_u32::<LittleEndian>(self.oldest_active_lsn.offset).unwrap();
        buf
    }

    pub fn decode(mut body: &[u8]) -> Result<Self> {
        let file = body.read_u32::<LittleEndian>().map_err(Error::io)?;
        let offset = body.read_u32::<LittleEndian>().map_err(Error::io)?;
        Ok(CheckpointBody {
            oldest_active_lsn: Lsn::new(file, offset),
        })
    }
}

pub struct TxnIdResetBody {
    pub floor: u32,
}

impl TxnIdResetBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4);
        buf.write_u32::<LittleEndian>(self.floor).unwrap();
        buf
    }

    pub fn decode(mut body: &[u8]) -> Result<Self> {
        let floor = body.read_u32::<LittleEndian>().map_err(Error::io)?;
        Ok(TxnIdResetBody { floor })
    }
}

pub fn register_handlers(dispatcher: &mut Dispatcher) {
    dispatcher.register(RECTYPE_COMMIT, handle_commit);
    dispatcher.register(RECTYPE_CHECKPOINT, handle_checkpoint);
    dispatcher.register(RECTYPE_TXN_ID_RESET, handle_txn_id_reset);
}

fn handle_commit(record: &Record, _lsn: Lsn, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    if ctx.opcode == Opcode::Print {
        if let Some(out) = ctx.print_out.as_deref_mut() {
            use std::io::Write as _;
            writeln!(out, "COMMIT txnid={}", record.txnid).map_err(Error::io)?;
        }
    }
    // A commit record is a marker consulted by recovery's loser-detection
    // (spec.md §4.5.2 Pass D); it has no physical effect of its own.
    Ok(())
}

fn handle_checkpoint(record: &Record, _lsn: Lsn, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    if ctx.opcode == Opcode::Print {
        let body = CheckpointBody::decode(&record.body)?;
        if let Some(out) = ctx.print_out.as_deref_mut() {
            use std::io::Write as _;
            writeln!(out, "CHECKPOINT oldest_active_lsn={}", body.oldest_active_lsn).map_err(Error::io)?;
        }
    }
    Ok(())
}

fn handle_txn_id_reset(record: &Record, _lsn: Lsn, ctx: &mut DispatchCtx<'_>) -> Result<()> {
    let body = TxnIdResetBody::decode(&record.body)?;
    match ctx.opcode {
        Opcode::Print => {
            if let Some(out) = ctx.print_out.as_deref_mut() {
                use std::io::Write as _;
                writeln!(out, "TXN_ID_RESET floor={}", body.floor).map_err(Error::io)?;
            }
            Ok(())
        }
        Opcode::ApplyForwardNormal => {
            ctx.txns.reset_floor(body.floor);
            Ok(())
        }
        _ => Ok(()),
    }
}
