//! FOP record bodies (spec.md §4.4 "Core records").
//!
//! Each body is hand-encoded with `byteorder`, mirroring the rest of the
//! log layer (see [`crate::log::record`]) rather than pulling in `serde` +
//! `bincode` for eight small, fixed-shape structs.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::fid::Fid;
use crate::txn::TxnId;

pub const FOP_CREATE: u32 = 1;
pub const FOP_REMOVE: u32 = 2;
pub const FOP_WRITE: u32 = 3;
pub const FOP_RENAME: u32 = 4;
pub const FOP_FILE_REMOVE: u32 = 5;
pub const FOP_INMEM_CREATE: u32 = 6;
pub const FOP_INMEM_REMOVE: u32 = 7;
pub const FOP_INMEM_RENAME: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AppPathCategory {
    Data = 0,
    Log = 1,
    Tmp = 2,
}

impl AppPathCategory {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => AppPathCategory::Data,
            1 => AppPathCategory::Log,
            2 => AppPathCategory::Tmp,
            other => {
                return Err(Error::corruption(
                    "fop record",
                    format!("bad app-path category {other}"),
                ))
            }
        })
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.write_u16::<LittleEndian>(s.len() as u16).unwrap();
    buf.extend_from_slice(s.as_bytes());
}

fn read_str(cur: &mut &[u8]) -> Result<String> {
    let len = cur.read_u16::<LittleEndian>().map_err(Error::io)? as usize;
    if cur.len() < len {
        return Err(Error::corruption("fop record", "truncated string"));
    }
    let (s, rest) = cur.split_at(len);
    *cur = rest;
    String::from_utf8(s.to_vec()).map_err(|_| Error::corruption("fop record", "invalid utf8 name"))
}

fn write_fid(buf: &mut Vec<u8>, fid: Fid) {
    buf.extend_from_slice(&fid.0);
}

fn read_fid(cur: &mut &[u8]) -> Result<Fid> {
    if cur.len() < 20 {
        return Err(Error::corruption("fop record", "truncated fid"));
    }
    let (bytes, rest) = cur.split_at(20);
    *cur = rest;
    let mut out = [0u8; 20];
    out.copy_from_slice(bytes);
    Ok(Fid(out))
}

pub struct FopCreate {
    pub name: String,
    pub category: AppPathCategory,
    pub mode: u32,
}

impl FopCreate {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_str(&mut buf, &self.name);
        buf.push(self.category as u8);
        buf.write_u32::<LittleEndian>(self.mode).unwrap();
        buf
    }

    pub fn decode(mut cur: &[u8]) -> Result<Self> {
        let name = read_str(&mut cur)?;
        let category = AppPathCategory::from_u8(read_u8(&mut cur)?)?;
        let mode = cur.read_u32::<LittleEndian>().map_err(Error::io)?;
        Ok(FopCreate { name, category, mode })
    }
}

pub struct FopRemove {
    pub name: String,
    pub fid: Fid,
    pub category: AppPathCategory,
}

impl FopRemove {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_str(&mut buf, &self.name);
        write_fid(&mut buf, self.fid);
        buf.push(self.category as u8);
        buf
    }

    pub fn decode(mut cur: &[u8]) -> Result<Self> {
        let name = read_str(&mut cur)?;
        let fid = read_fid(&mut cur)?;
        let category = AppPathCategory::from_u8(read_u8(&mut cur)?)?;
        Ok(FopRemove { name, fid, category })
    }
}

pub struct FopWrite {
    pub name: String,
    pub category: AppPathCategory,
    pub offset: u64,
    pub bytes: Vec<u8>,
    pub flag: u8,
}

impl FopWrite {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_str(&mut buf, &self.name);
        buf.push(self.category as u8);
        buf.write_u64::<LittleEndian>(self.offset).unwrap();
        buf.write_u32::<LittleEndian>(self.bytes.len() as u32).unwrap();
        buf.extend_from_slice(&self.bytes);
        buf.push(self.flag);
        buf
    }

    pub fn decode(mut cur: &[u8]) -> Result<Self> {
        let name = read_str(&mut cur)?;
        let category = AppPathCategory::from_u8(read_u8(&mut cur)?)?;
        let offset = cur.read_u64::<LittleEndian>().map_err(Error::io)?;
        let len = cur.read_u32::<LittleEndian>().map_err(Error::io)? as usize;
        if cur.len() < len + 1 {
            return Err(Error::corruption("fop record", "truncated write body"));
        }
        let bytes = cur[..len].to_vec();
        cur = &cur[len..];
        let flag = read_u8(&mut cur)?;
        Ok(FopWrite {
            name,
            category,
            offset,
            bytes,
            flag,
        })
    }
}

pub struct FopRename {
    pub oldname: String,
    pub newname: String,
    pub fid: Fid,
    pub category: AppPathCategory,
}

impl FopRename {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_str(&mut buf, &self.oldname);
        write_str(&mut buf, &self.newname);
        write_fid(&mut buf, self.fid);
        buf.push(self.category as u8);
        buf
    }

    pub fn decode(mut cur: &[u8]) -> Result<Self> {
        let oldname = read_str(&mut cur)?;
        let newname = read_str(&mut cur)?;
        let fid = read_fid(&mut cur)?;
        let category = AppPathCategory::from_u8(read_u8(&mut cur)?)?;
        Ok(FopRename {
            oldname,
            newname,
            fid,
            category,
        })
    }
}

pub struct FopFileRemove {
    pub real_fid: Fid,
    pub tmp_fid: Fid,
    pub name: String,
    pub category: AppPathCategory,
    pub child_txn: Option<TxnId>,
}

impl FopFileRemove {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_fid(&mut buf, self.real_fid);
        write_fid(&mut buf, self.tmp_fid);
        write_str(&mut buf, &self.name);
        buf.push(self.category as u8);
        buf.write_u32::<LittleEndian>(self.child_txn.unwrap_or(0)).unwrap();
        buf
    }

    pub fn decode(mut cur: &[u8]) -> Result<Self> {
        let real_fid = read_fid(&mut cur)?;
        let tmp_fid = read_fid(&mut cur)?;
        let name = read_str(&mut cur)?;
        let category = AppPathCategory::from_u8(read_u8(&mut cur)?)?;
        let child_raw = cur.read_u32::<LittleEndian>().map_err(Error::io)?;
        Ok(FopFileRemove {
            real_fid,
            tmp_fid,
            name,
            category,
            child_txn: if child_raw == 0 { None } else { Some(child_raw) },
        })
    }
}

pub struct FopInmemCreate {
    pub name: String,
    pub fid: Fid,
    pub page_size: u32,
}

impl FopInmemCreate {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_str(&mut buf, &self.name);
        write_fid(&mut buf, self.fid);
        buf.write_u32::<LittleEndian>(self.page_size).unwrap();
        buf
    }

    pub fn decode(mut cur: &[u8]) -> Result<Self> {
        let name = read_str(&mut cur)?;
        let fid = read_fid(&mut cur)?;
        let page_size = cur.read_u32::<LittleEndian>().map_err(Error::io)?;
        Ok(FopInmemCreate { name, fid, page_size })
    }
}

pub struct FopInmemRemove {
    pub name: String,
    pub fid: Fid,
}

impl FopInmemRemove {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_str(&mut buf, &self.name);
        write_fid(&mut buf, self.fid);
        buf
    }

    pub fn decode(mut cur: &[u8]) -> Result<Self> {
        let name = read_str(&mut cur)?;
        let fid = read_fid(&mut cur)?;
        Ok(FopInmemRemove { name, fid })
    }
}

pub struct FopInmemRename {
    pub oldname: String,
    pub newname: String,
    pub fid: Fid,
}

impl FopInmemRename {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_str(&mut buf, &self.oldname);
        write_str(&mut buf, &self.newname);
        write_fid(&mut buf, self.fid);
        buf
    }

    pub fn decode(mut cur: &[u8]) -> Result<Self> {
        let oldname = read_str(&mut cur)?;
        let newname = read_str(&mut cur)?;
        let fid = read_fid(&mut cur)?;
        Ok(FopInmemRename {
            oldname,
            newname,
            fid,
        })
    }
}

fn read_u8(cur: &mut &[u8]) -> Result<u8> {
    if cur.is_empty() {
        return Err(Error::corruption("fop record", "truncated byte"));
    }
    let b = cur[0];
    *cur = &cur[1..];
    Ok(b)
}
