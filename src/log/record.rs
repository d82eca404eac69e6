//! Log record framing (spec.md §4.2, §6, §8 property 5).
//!
//! On-disk frame:
//!
//! ```text
//!  0        4        8                    N-pad      N
//!  +--------+--------+----------+----------+-----+--------+
//!  | length | cksum32| rectype  | txnid    | ... | pad (0) |
//!  +--------+--------+----------+----------+-----+--------+
//! ```
//!
//! `length` is the size of the record *excluding* any trailing pad
//! (spec.md §3: "the recorded size excludes trailing pad"); `cksum32` is a
//! CRC32 computed over every byte from `rectype` through the end of the
//! pad. rectype < [`APPLICATION_RECTYPE_BASE`] is reserved for the engine.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use static_assertions::const_assert;

use crate::error::{Error, Result};
use crate::lsn::Lsn;

/// rectype values at or above this are routed to the application handler
/// (spec.md §6).
pub const APPLICATION_RECTYPE_BASE: u32 = 10_000;

/// Size in bytes of the `length` + `cksum32` frame prefix.
pub const FRAME_PREFIX_LEN: usize = 8;
/// Size in bytes of `rectype` + `txnid` + `prev_lsn`.
pub const RECORD_HEADER_LEN: usize = 4 + 4 + 8;
const_assert!(RECORD_HEADER_LEN == 16);

/// One decoded log record: the fixed `(rectype, txnid, prev_lsn)` header
/// plus its rectype-specific body (spec.md §3 "Log Record").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub rectype: u32,
    pub txnid: u32,
    pub prev_lsn: Lsn,
    pub body: Vec<u8>,
}

impl Record {
    pub fn new(rectype: u32, txnid: u32, prev_lsn: Lsn, body: Vec<u8>) -> Self {
        Record {
            rectype,
            txnid,
            prev_lsn,
            body,
        }
    }

    pub fn is_application_specific(&self) -> bool {
        self.rectype >= APPLICATION_RECTYPE_BASE
    }

    /// The unpadded size of this record once framed (header + body), i.e.
    /// the value that will be recorded in the frame's `length` field.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.body.len()
    }

    /// Encodes the full on-disk frame, including the `length`/`cksum32`
    /// prefix and zero padding out to a multiple of `cipher_block` bytes.
    /// `cipher_block` of 1 disables padding.
    pub fn encode_frame(&self, cipher_block: u32) -> Vec<u8> {
        let unpadded = self.encoded_len();
        let cipher_block = cipher_block.max(1) as usize;
        let padded = align_up(unpadded, cipher_block);

        let mut payload = Vec::with_capacity(padded);
        payload.write_u32::<LittleEndian>(self.rectype).unwrap();
        payload.write_u32::<LittleEndian>(self.txnid).unwrap();
        payload.write_u32::<LittleEndian>(self.prev_lsn.file).unwrap();
        payload
            .write_u32::<LittleEndian>(self.prev_lsn.offset)
            .unwrap();
        payload.extend_from_slice(&self.body);
        payload.resize(padded, 0);

        let checksum = crc32fast::hash(&payload);

        let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + padded);
        frame
            .write_u32::<LittleEndian>(unpadded as u32)
            .unwrap();
        frame.write_u32::<LittleEndian>(checksum).unwrap();
        frame.extend_from_slice(&payload);
        frame
    }

    /// The full physical size (including prefix and pad) this record will
    /// occupy on disk for a given cipher block size.
    pub fn framed_len(&self, cipher_block: u32) -> usize {
        let cipher_block = cipher_block.max(1) as usize;
        FRAME_PREFIX_LEN + align_up(self.encoded_len(), cipher_block)
    }
}

fn align_up(n: usize, block: usize) -> usize {
    if block <= 1 {
        return n;
    }
    let rem = n % block;
    if rem == 0 {
        n
    } else {
        n + (block - rem)
    }
}

/// Decodes one frame starting at `bytes[0]`. Returns the record and the
/// number of physical bytes it occupied. A checksum mismatch or an
/// incomplete frame is reported as [`Error::Corruption`]; per spec.md
/// §4.2, the caller treats this as "end of log here", not a hard failure.
pub fn decode_frame(bytes: &[u8], cipher_block: u32) -> Result<(Record, usize)> {
    if bytes.len() < FRAME_PREFIX_LEN {
        return Err(Error::corruption("log frame", "truncated frame prefix"));
    }
    let mut cur = bytes;
    let unpadded = cur.read_u32::<LittleEndian>().map_err(Error::io)? as usize;
    let checksum = cur.read_u32::<LittleEndian>().map_err(Error::io)?;

    let cipher_block = cipher_block.max(1) as usize;
    let padded = align_up(unpadded, cipher_block);
    if cur.len() < padded {
        return Err(Error::corruption("log frame", "truncated frame body"));
    }
    let payload = &cur[..padded];
    if crc32fast::hash(payload) != checksum {
        return Err(Error::corruption("log frame", "checksum mismatch"));
    }
    if unpadded < RECORD_HEADER_LEN {
        return Err(Error::corruption("log frame", "record shorter than header"));
    }

    let mut hdr = &payload[..RECORD_HEADER_LEN];
    let rectype = hdr.read_u32::<LittleEndian>().map_err(Error::io)?;
    let txnid = hdr.read_u32::<LittleEndian>().map_err(Error::io)?;
    let prev_file = hdr.read_u32::<LittleEndian>().map_err(Error::io)?;
    let prev_offset = hdr.read_u32::<LittleEndian>().map_err(Error::io)?;
    let body = payload[RECORD_HEADER_LEN..unpadded].to_vec();

    let record = Record {
        rectype,
        txnid,
        prev_lsn: Lsn::new(prev_file, prev_offset),
        body,
    };
    Ok((record, FRAME_PREFIX_LEN + padded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_no_padding() {
        let rec = Record::new(5, 42, Lsn::new(1, 16), vec![1, 2, 3, 4, 5]);
        let frame = rec.encode_frame(1);
        let (decoded, consumed) = decode_frame(&frame, 1).unwrap();
        assert_eq!(decoded, rec);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn round_trip_with_padding() {
        let rec = Record::new(7, 1, Lsn::ZERO, vec![0xAB; 3]);
        let frame = rec.encode_frame(16);
        assert_eq!(frame.len() % 16, 0);
        let (decoded, consumed) = decode_frame(&frame, 16).unwrap();
        assert_eq!(decoded, rec);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn checksum_mismatch_is_corruption() {
        let rec = Record::new(1, 1, Lsn::ZERO, vec![9, 9]);
        let mut frame = rec.encode_frame(1);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let err = decode_frame(&frame, 1).unwrap_err();
        assert!(matches!(err, Error::Corruption { .. }));
    }

    #[test]
    fn application_rectype_routing() {
        let rec = Record::new(APPLICATION_RECTYPE_BASE, 1, Lsn::ZERO, vec![]);
        assert!(rec.is_application_specific());
        let rec = Record::new(APPLICATION_RECTYPE_BASE - 1, 1, Lsn::ZERO, vec![]);
        assert!(!rec.is_application_specific());
    }
}
