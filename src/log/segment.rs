//! Log segment files: naming, header layout, and version policy.
//!
//! Segment files are named `log.NNNNNNNNNN` (spec.md §6) and begin with a
//! fixed header (magic, byte-order mark, version, segment size).

use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use static_assertions::const_assert;

use crate::error::{Error, Result};

pub const SEGMENT_MAGIC: u32 = 0x4C4F_4731; // "LOG1"
pub const BYTE_ORDER_MARK: u32 = 0x1234_5678;

/// Major.minor log format version written by this crate. See SPEC_FULL.md
/// "Open Question Decisions": recovery refuses a greater major version and
/// accepts any minor version within the same major.
pub const FORMAT_MAJOR: u16 = 1;
pub const FORMAT_MINOR: u16 = 0;

pub const SEGMENT_HEADER_LEN: usize = 16;
const_assert!(SEGMENT_HEADER_LEN == 4 + 4 + 4 + 4);

pub struct SegmentHeader {
    pub magic: u32,
    pub byte_order_mark: u32,
    pub version: u32,
    pub segment_size: u32,
}

impl SegmentHeader {
    pub fn new(segment_size: u32) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            byte_order_mark: BYTE_ORDER_MARK,
            version: version_word(FORMAT_MAJOR, FORMAT_MINOR),
            segment_size,
        }
    }

    pub fn encode(&self) -> [u8; SEGMENT_HEADER_LEN] {
        let mut buf = [0u8; SEGMENT_HEADER_LEN];
        {
            let mut w: &mut [u8] = &mut buf;
            w.write_u32::<LittleEndian>(self.magic).unwrap();
            w.write_u32::<LittleEndian>(self.byte_order_mark).unwrap();
            w.write_u32::<LittleEndian>(self.version).unwrap();
            w.write_u32::<LittleEndian>(self.segment_size).unwrap();
        }
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < SEGMENT_HEADER_LEN {
            return Err(Error::corruption("segment header", "too short"));
        }
        let magic = buf.read_u32::<LittleEndian>().map_err(Error::io)?;
        let byte_order_mark = buf.read_u32::<LittleEndian>().map_err(Error::io)?;
        let version = buf.read_u32::<LittleEndian>().map_err(Error::io)?;
        let segment_size = buf.read_u32::<LittleEndian>().map_err(Error::io)?;
        if magic != SEGMENT_MAGIC {
            return Err(Error::corruption("segment header", "bad magic"));
        }
        if byte_order_mark != BYTE_ORDER_MARK {
            return Err(Error::corruption(
                "segment header",
                "byte order mismatch (cross-endian log files are not supported)",
            ));
        }
        let (major, _minor) = split_version(version);
        if major > FORMAT_MAJOR {
            return Err(Error::InvalidArgument(format!(
                "log segment format major version {major} is newer than this build supports ({FORMAT_MAJOR})"
            )));
        }
        Ok(SegmentHeader {
            magic,
            byte_order_mark,
            version,
            segment_size,
        })
    }
}

pub fn version_word(major: u16, minor: u16) -> u32 {
    ((major as u32) << 16) | minor as u32
}

pub fn split_version(version: u32) -> (u16, u16) {
    ((version >> 16) as u16, version as u16)
}

/// Builds the path of segment number `file_no` under `log_dir`.
pub fn segment_path(log_dir: &Path, file_no: u32) -> PathBuf {
    log_dir.join(format!("log.{file_no:010}"))
}

/// Parses a segment file number out of a directory entry name, if any.
pub fn parse_segment_no(file_name: &str) -> Option<u32> {
    file_name.strip_prefix("log.").and_then(|s| s.parse().ok())
}

/// Lists existing segment numbers under `log_dir`, sorted ascending.
pub fn existing_segments(log_dir: &Path) -> Result<Vec<u32>> {
    if !log_dir.exists() {
        return Ok(Vec::new());
    }
    let mut nums = Vec::new();
    for entry in std::fs::read_dir(log_dir).map_err(|e| Error::io_at(log_dir, e))? {
        let entry = entry.map_err(|e| Error::io_at(log_dir, e))?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(n) = parse_segment_no(name) {
                nums.push(n);
            }
        }
    }
    nums.sort_unstable();
    Ok(nums)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = SegmentHeader::new(1024);
        let bytes = h.encode();
        let h2 = SegmentHeader::decode(&bytes).unwrap();
        assert_eq!(h2.segment_size, 1024);
        assert_eq!(h2.version, h.version);
    }

    #[test]
    fn newer_major_version_rejected() {
        let mut h = SegmentHeader::new(1024);
        h.version = version_word(FORMAT_MAJOR + 1, 0);
        let bytes = h.encode();
        let err = SegmentHeader::decode(&bytes).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn older_minor_version_accepted() {
        let mut h = SegmentHeader::new(1024);
        h.version = version_word(FORMAT_MAJOR, 0);
        let bytes = h.encode();
        assert!(SegmentHeader::decode(&bytes).is_ok());
    }

    #[test]
    fn segment_path_formatting() {
        let p = segment_path(Path::new("/home/db"), 7);
        assert_eq!(p, PathBuf::from("/home/db/log.0000000007"));
        assert_eq!(parse_segment_no("log.0000000007"), Some(7));
        assert_eq!(parse_segment_no("__db.001"), None);
    }
}
