//! File identity (spec.md §3 "File Identity").
//!
//! A `Fid` is a stable 20-byte identifier independent of path. Rename
//! changes the path, never the `fid`. Every FOP log record references
//! files by `fid`, never by path.

use rand::RngCore;
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fid(pub [u8; 20]);

impl Fid {
    pub const NIL: Fid = Fid([0u8; 20]);

    /// Generates a fresh, globally-unique-enough file id. The source
    /// derives these from a machine id plus a counter; we use randomness
    /// instead (no durable machine-id store to seed from in this core),
    /// which is sufficient since a `Fid` only needs to be unique within
    /// one environment's lifetime.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        Fid(bytes)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fid({})", self.to_hex())
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
