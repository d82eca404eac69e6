//! Forward/backward log cursors (spec.md §4.2).
//!
//! A cursor transparently crosses segment-file boundaries: `next()` past
//! the last record of one segment continues at the first record of the
//! next, and `prev()` symmetrically walks backward. Walking off either end
//! of the log returns [`Error::NotFound`], never [`Error::Corruption`]
//! (spec.md §8 scenario S5).

use crate::error::{Error, Result};
use crate::lsn::Lsn;

use super::record::{decode_frame, Record};
use super::LogManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Position {
    /// Before the very first record.
    BeforeFirst,
    At(Lsn),
    /// After the very last record.
    AfterLast,
}

pub struct LogCursor<'a> {
    log: &'a LogManager,
    pos: Position,
}

impl<'a> LogCursor<'a> {
    pub(super) fn new(log: &'a LogManager) -> Self {
        LogCursor {
            log,
            pos: Position::BeforeFirst,
        }
    }

    pub fn position(&self) -> Option<Lsn> {
        match self.pos {
            Position::At(lsn) => Some(lsn),
            _ => None,
        }
    }

    pub fn first(&mut self) -> Result<Record> {
        let lsn = self
            .log
            .first_lsn()?
            .ok_or_else(|| Error::NotFound("log is empty".into()))?;
        self.set(lsn)
    }

    pub fn last(&mut self) -> Result<Record> {
        let lsn = self
            .log
            .last_lsn()?
            .ok_or_else(|| Error::NotFound("log is empty".into()))?;
        self.set(lsn)
    }

    pub fn set(&mut self, lsn: Lsn) -> Result<Record> {
        let (rec, _len) = self.log.read_at(lsn)?;
        self.pos = Position::At(lsn);
        Ok(rec)
    }

    pub fn next(&mut self) -> Result<Record> {
        let from = match self.pos {
            Position::AfterLast => return Err(Error::NotFound("past end of log".into())),
            Position::BeforeFirst => return self.first(),
            Position::At(lsn) => lsn,
        };
        match self.log.lsn_after(from)? {
            Some(next_lsn) => self.set(next_lsn),
            None => {
                self.pos = Position::AfterLast;
                Err(Error::NotFound("past end of log".into()))
            }
        }
    }

    pub fn prev(&mut self) -> Result<Record> {
        let from = match self.pos {
            Position::BeforeFirst => return Err(Error::NotFound("before start of log".into())),
            Position::AfterLast => return self.last(),
            Position::At(lsn) => lsn,
        };
        match self.log.lsn_before(from)? {
            Some(prev_lsn) => self.set(prev_lsn),
            None => {
                self.pos = Position::BeforeFirst;
                Err(Error::NotFound("before start of log".into()))
            }
        }
    }
}

/// Scans the bytes of one fully-written segment (header already stripped)
/// forward, yielding `(offset_within_segment, Record, physical_len)` for
/// every valid frame. Stops silently at the first undecodable frame,
/// mirroring spec.md §4.2's "a record whose checksum does not match
/// terminates the log at that offset for recovery purposes".
pub(super) fn scan_forward(body: &[u8], cipher_block: u32) -> Vec<(u32, Record, u32)> {
    let mut out = Vec::new();
    let mut off = 0usize;
    while off < body.len() {
        match decode_frame(&body[off..], cipher_block) {
            Ok((rec, len)) => {
                out.push((off as u32, rec, len as u32));
                off += len;
            }
            Err(_) => break,
        }
    }
    out
}
