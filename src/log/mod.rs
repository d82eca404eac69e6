//! Log Manager (C2, spec.md §4.2).
//!
//! Appends framed records, rotates segment files, and supports
//! forward/backward cursors. Mirrors the shape of the teacher's
//! `fs/ufs/log.rs` (a single mutex-protected struct, `begin_op`/`end_op`
//! style brackets live one layer up in [`crate::env`]) but a *logical*
//! record log rather than a physical block log, and real file I/O instead
//! of a `Disk` HAL.

pub mod cursor;
pub mod record;
pub mod segment;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::lsn::Lsn;

pub use cursor::LogCursor;
pub use record::{Record, APPLICATION_RECTYPE_BASE};

bitflags::bitflags! {
    /// Flags accepted by [`LogManager::append`] (spec.md §4.2).
    pub struct AppendFlags: u32 {
        /// The log must be fsync'd through the returned LSN before
        /// `append` returns.
        const DURABLE = 0b0001;
    }
}

struct Inner {
    cur_file: File,
    cur_file_no: u32,
    /// Logical write offset within `cur_file` (past the segment header).
    cur_offset: u32,
}

struct LogCore {
    log_dir: PathBuf,
    segment_max: u32,
    cipher_block: u32,
    inner: Mutex<Inner>,
}

/// A handle to the append-only logical log rooted at `log_dir`.
/// Cheaply cloneable (spec.md §4.2 `open`/`refresh`: "detach from the
/// in-region log state without destroying it" --- here that's just handing
/// back another reference to the same core).
#[derive(Clone)]
pub struct LogManager {
    core: Arc<LogCore>,
}

impl LogManager {
    /// Opens (creating if empty) the log rooted at `log_dir`. If the last
    /// existing segment has a torn tail (a partially-written final
    /// record, e.g. from a crash mid-append), it is truncated back to the
    /// last valid frame boundary --- those bytes were never returned to a
    /// caller as a committed LSN, so dropping them does not violate "the
    /// log never rewrites committed bytes" (spec.md §4.2).
    pub fn open(log_dir: &Path, segment_max: u32, cipher_block: u32) -> Result<Self> {
        std::fs::create_dir_all(log_dir).map_err(|e| Error::io_at(log_dir, e))?;
        let existing = segment::existing_segments(log_dir)?;

        let (cur_file_no, cur_file, cur_offset) = if existing.is_empty() {
            let file_no = 1;
            let path = segment::segment_path(log_dir, file_no);
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .map_err(|e| Error::io_at(&path, e))?;
            let header = segment::SegmentHeader::new(segment_max);
            file.write_all(&header.encode()).map_err(Error::io)?;
            (file_no, file, segment::SEGMENT_HEADER_LEN as u32)
        } else {
            let file_no = *existing.last().unwrap();
            let path = segment::segment_path(log_dir, file_no);
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| Error::io_at(&path, e))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).map_err(Error::io)?;
            if buf.len() < segment::SEGMENT_HEADER_LEN {
                return Err(Error::corruption(path.display().to_string(), "missing header"));
            }
            segment::SegmentHeader::decode(&buf[..segment::SEGMENT_HEADER_LEN])?;
            let body = &buf[segment::SEGMENT_HEADER_LEN..];
            let valid = cursor::scan_forward(body, cipher_block);
            let valid_len: u32 = valid.iter().map(|(_, _, len)| *len).sum();
            let truncated_to = segment::SEGMENT_HEADER_LEN as u64 + valid_len as u64;
            if truncated_to != buf.len() as u64 {
                log::warn!(
                    "log: truncating torn tail of {} ({} -> {} bytes)",
                    path.display(),
                    buf.len(),
                    truncated_to
                );
                file.set_len(truncated_to).map_err(Error::io)?;
            }
            (file_no, file, truncated_to as u32)
        };

        Ok(LogManager {
            core: Arc::new(LogCore {
                log_dir: log_dir.to_path_buf(),
                segment_max,
                cipher_block,
                inner: Mutex::new(Inner {
                    cur_file,
                    cur_file_no,
                    cur_offset,
                }),
            }),
        })
    }

    /// Hands back another handle to the same log state without closing
    /// it (spec.md §4.2 `refresh`).
    pub fn refresh(&self) -> Self {
        LogManager {
            core: self.core.clone(),
        }
    }

    pub fn cipher_block(&self) -> u32 {
        self.core.cipher_block
    }

    /// Appends `body` as a new record of `rectype` for `txnid`, back-linked
    /// to `prev_lsn`. Rejects bodies too large to ever fit a segment
    /// before doing any I/O (spec.md §8 boundary condition).
    pub fn append(
        &self,
        rectype: u32,
        txnid: u32,
        prev_lsn: Lsn,
        body: &[u8],
        flags: AppendFlags,
    ) -> Result<Lsn> {
        let record = Record::new(rectype, txnid, prev_lsn, body.to_vec());
        let framed_len = record.framed_len(self.core.cipher_block) as u64;
        let capacity = (self.core.segment_max as u64).saturating_sub(segment::SEGMENT_HEADER_LEN as u64);
        if framed_len > capacity {
            return Err(Error::InvalidArgument(format!(
                "record of {framed_len} bytes exceeds segment capacity {capacity}"
            )));
        }

        let mut inner = self.core.inner.lock();
        if inner.cur_offset as u64 + framed_len > self.core.segment_max as u64 {
            self.rotate(&mut inner)?;
        }

        let lsn = Lsn::new(inner.cur_file_no, inner.cur_offset);
        let frame = record.encode_frame(self.core.cipher_block);
        inner
            .cur_file
            .seek(SeekFrom::Start(lsn.offset as u64))
            .map_err(Error::io)?;
        inner.cur_file.write_all(&frame).map_err(Error::io)?;
        inner.cur_offset += frame.len() as u32;

        if flags.contains(AppendFlags::DURABLE) {
            inner.cur_file.sync_data().map_err(Error::io)?;
        }
        Ok(lsn)
    }

    fn rotate(&self, inner: &mut Inner) -> Result<()> {
        inner.cur_file.sync_data().map_err(Error::io)?;
        let next_no = inner.cur_file_no + 1;
        let path = segment::segment_path(&self.core.log_dir, next_no);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::io_at(&path, e))?;
        let header = segment::SegmentHeader::new(self.core.segment_max);
        file.write_all(&header.encode()).map_err(Error::io)?;
        inner.cur_file = file;
        inner.cur_file_no = next_no;
        inner.cur_offset = segment::SEGMENT_HEADER_LEN as u32;
        Ok(())
    }

    /// Forces durability at least through `lsn_hint`. Sealed (non-current)
    /// segments are always durable already, because [`Self::rotate`]
    /// syncs the old segment before switching.
    pub fn flush(&self, lsn_hint: Lsn) -> Result<()> {
        let inner = self.core.inner.lock();
        if lsn_hint.file >= inner.cur_file_no {
            inner.cur_file.sync_data().map_err(Error::io)?;
        }
        Ok(())
    }

    pub fn cursor(&self) -> LogCursor<'_> {
        LogCursor::new(self)
    }

    fn end_offset_of(&self, file_no: u32) -> Result<u32> {
        let inner = self.core.inner.lock();
        if file_no == inner.cur_file_no {
            return Ok(inner.cur_offset);
        }
        let path = segment::segment_path(&self.core.log_dir, file_no);
        let meta = std::fs::metadata(&path).map_err(|e| Error::io_at(&path, e))?;
        Ok(meta.len() as u32)
    }

    fn read_segment_body(&self, file_no: u32) -> Result<Vec<u8>> {
        let path = segment::segment_path(&self.core.log_dir, file_no);
        let end = self.end_offset_of(file_no)?;
        let mut buf = vec![0u8; end as usize];
        let mut file = File::open(&path).map_err(|e| Error::io_at(&path, e))?;
        file.read_exact(&mut buf[..]).map_err(Error::io)?;
        Ok(buf[segment::SEGMENT_HEADER_LEN..].to_vec())
    }

    fn entries_of(&self, file_no: u32) -> Result<Vec<(u32, Record, u32)>> {
        let body = self.read_segment_body(file_no)?;
        Ok(cursor::scan_forward(&body, self.core.cipher_block))
    }

    fn existing_file_nos(&self) -> Result<Vec<u32>> {
        let mut nums = segment::existing_segments(&self.core.log_dir)?;
        let cur = self.core.inner.lock().cur_file_no;
        if !nums.contains(&cur) {
            nums.push(cur);
            nums.sort_unstable();
        }
        Ok(nums)
    }

    pub(crate) fn first_lsn(&self) -> Result<Option<Lsn>> {
        for file_no in self.existing_file_nos()? {
            let entries = self.entries_of(file_no)?;
            if let Some((off, _, _)) = entries.first() {
                return Ok(Some(Lsn::new(file_no, *off)));
            }
        }
        Ok(None)
    }

    pub(crate) fn last_lsn(&self) -> Result<Option<Lsn>> {
        for file_no in self.existing_file_nos()?.into_iter().rev() {
            let entries = self.entries_of(file_no)?;
            if let Some((off, _, _)) = entries.last() {
                return Ok(Some(Lsn::new(file_no, *off)));
            }
        }
        Ok(None)
    }

    pub(crate) fn read_at(&self, lsn: Lsn) -> Result<(Record, u32)> {
        let body = self.read_segment_body(lsn.file)?;
        let off = lsn.offset as usize;
        if off >= body.len() {
            return Err(Error::not_found_lsn(lsn));
        }
        let (rec, len) = record::decode_frame(&body[off..], self.core.cipher_block)?;
        Ok((rec, len as u32))
    }

    pub(crate) fn lsn_after(&self, lsn: Lsn) -> Result<Option<Lsn>> {
        let (_, len) = self.read_at(lsn)?;
        let next_off = lsn.offset + len;
        let end = self.end_offset_of(lsn.file)?;
        if next_off < end {
            return Ok(Some(Lsn::new(lsn.file, next_off)));
        }
        let mut file_no = lsn.file + 1;
        let existing = self.existing_file_nos()?;
        while existing.contains(&file_no) {
            let entries = self.entries_of(file_no)?;
            if let Some((off, _, _)) = entries.first() {
                return Ok(Some(Lsn::new(file_no, *off)));
            }
            file_no += 1;
        }
        Ok(None)
    }

    pub(crate) fn lsn_before(&self, lsn: Lsn) -> Result<Option<Lsn>> {
        let entries = self.entries_of(lsn.file)?;
        if let Some(idx) = entries.iter().position(|(off, _, _)| *off == lsn.offset) {
            if idx > 0 {
                return Ok(Some(Lsn::new(lsn.file, entries[idx - 1].0)));
            }
        }
        if lsn.file == 0 {
            return Ok(None);
        }
        let mut file_no = lsn.file;
        while file_no > 0 {
            file_no -= 1;
            if !self.existing_file_nos()?.contains(&file_no) {
                continue;
            }
            let entries = self.entries_of(file_no)?;
            if let Some((off, _, _)) = entries.last() {
                return Ok(Some(Lsn::new(file_no, *off)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_cursor_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogManager::open(dir.path(), 4096, 1).unwrap();
        let l1 = log.append(1, 1, Lsn::ZERO, b"hello", AppendFlags::empty()).unwrap();
        let l2 = log.append(1, 1, l1, b"world", AppendFlags::empty()).unwrap();
        assert!(l1 < l2);

        let mut cur = log.cursor();
        let r1 = cur.first().unwrap();
        assert_eq!(r1.body, b"hello");
        let r2 = cur.next().unwrap();
        assert_eq!(r2.body, b"world");
        assert!(cur.next().is_err());
    }

    #[test]
    fn backward_cursor_matches_forward() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogManager::open(dir.path(), 4096, 1).unwrap();
        let l1 = log.append(1, 1, Lsn::ZERO, b"a", AppendFlags::empty()).unwrap();
        let _l2 = log.append(1, 1, l1, b"b", AppendFlags::empty()).unwrap();
        let _l3 = log.append(1, 1, l1, b"c", AppendFlags::empty()).unwrap();

        let mut cur = log.cursor();
        let last = cur.last().unwrap();
        assert_eq!(last.body, b"c");
        let prev = cur.prev().unwrap();
        assert_eq!(prev.body, b"b");
        let first = cur.prev().unwrap();
        assert_eq!(first.body, b"a");
        assert!(cur.prev().is_err());
    }

    #[test]
    fn rotation_never_splits_a_record() {
        let dir = tempfile::tempdir().unwrap();
        // Small enough segment that a couple records force a rotation.
        let log = LogManager::open(dir.path(), 96, 1).unwrap();
        let mut prev = Lsn::ZERO;
        let mut lsns = Vec::new();
        for i in 0..10u32 {
            let body = vec![i as u8; 8];
            let lsn = log.append(1, 1, prev, &body, AppendFlags::empty()).unwrap();
            lsns.push(lsn);
            prev = lsn;
        }
        assert!(lsns.iter().map(|l| l.file).max().unwrap() > 1);
        let mut cur = log.cursor();
        let first = cur.first().unwrap();
        assert_eq!(first.body, vec![0u8; 8]);
        let mut count = 1;
        while cur.next().is_ok() {
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[test]
    fn torn_tail_is_truncated_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = LogManager::open(dir.path(), 4096, 1).unwrap();
            let _ = log.append(1, 1, Lsn::ZERO, b"good", AppendFlags::DURABLE).unwrap();
        }
        // Corrupt the tail by appending garbage bytes directly.
        let seg = segment::segment_path(dir.path(), 1);
        {
            use std::io::Write as _;
            let mut f = OpenOptions::new().append(true).open(&seg).unwrap();
            f.write_all(&[0xFFu8; 16]).unwrap();
        }
        let log = LogManager::open(dir.path(), 4096, 1).unwrap();
        let mut cur = log.cursor();
        let r = cur.first().unwrap();
        assert_eq!(r.body, b"good");
        assert!(cur.next().is_err());
        // And the log is still appendable afterwards.
        let lsn = cur.position().unwrap();
        let next = log.append(1, 1, lsn, b"more", AppendFlags::empty()).unwrap();
        assert!(next.offset > lsn.offset);
    }

    #[test]
    fn oversized_record_rejected_before_append() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogManager::open(dir.path(), 64, 1).unwrap();
        let big = vec![0u8; 1000];
        let err = log.append(1, 1, Lsn::ZERO, &big, AppendFlags::empty()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
