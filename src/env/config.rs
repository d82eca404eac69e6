//! `DB_CONFIG` parsing (spec.md §6).
//!
//! Whitespace-separated `NAME VALUE` per line; `#`-prefixed or blank lines
//! are comments. A dozen small settings do not earn a config crate (see
//! SPEC_FULL.md "AMBIENT STACK"), so this is a hand-rolled line parser,
//! matching the grammar's own simplicity.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

const RECOGNIZED: &[&str] = &[
    "set_cachesize",
    "set_data_dir",
    "set_flags",
    "set_lg_bsize",
    "set_lg_max",
    "set_lg_regionmax",
    "set_lg_dir",
    "set_lk_detect",
    "set_lk_max_locks",
    "set_lk_max_lockers",
    "set_lk_max_objects",
    "set_lock_timeout",
    "set_mp_mmapsize",
    "set_mp_max_openfd",
    "set_mp_max_write",
    "set_shm_key",
    "set_tas_spins",
    "set_tmp_dir",
    "set_tx_max",
    "set_txn_timeout",
    "set_verbose",
];

/// The parsed contents of one `DB_CONFIG` file: each recognized name maps
/// to the raw, whitespace-split argument tokens that followed it on its
/// line. A name set more than once keeps only the last occurrence, matching
/// the source's "later directives win" config semantics.
#[derive(Debug, Default, Clone)]
pub struct DbConfig {
    settings: HashMap<String, Vec<String>>,
}

impl DbConfig {
    /// Loads `home_dir/DB_CONFIG` if it exists; an absent file is an empty,
    /// valid config (spec.md §6: "`DB_CONFIG` — optional text config").
    pub fn load(home_dir: &Path) -> Result<Self> {
        let path = home_dir.join("DB_CONFIG");
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DbConfig::default()),
            Err(e) => Err(Error::io_at(&path, e)),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut settings = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut parts = trimmed.split_whitespace();
            let name = parts
                .next()
                .ok_or_else(|| Error::InvalidArgument(format!("DB_CONFIG line {}: empty", lineno + 1)))?;
            if !RECOGNIZED.contains(&name) {
                return Err(Error::InvalidArgument(format!(
                    "DB_CONFIG line {}: unrecognized setting {name:?}",
                    lineno + 1
                )));
            }
            let values: Vec<String> = parts.map(str::to_string).collect();
            settings.insert(name.to_string(), values);
        }
        Ok(DbConfig { settings })
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.settings.get(name).map(Vec::as_slice)
    }

    pub fn data_dir(&self) -> Option<&str> {
        self.get("set_data_dir").and_then(|v| v.first()).map(String::as_str)
    }

    pub fn tmp_dir(&self) -> Option<&str> {
        self.get("set_tmp_dir").and_then(|v| v.first()).map(String::as_str)
    }

    pub fn lg_dir(&self) -> Option<&str> {
        self.get("set_lg_dir").and_then(|v| v.first()).map(String::as_str)
    }

    /// `set_lg_max n` --- maximum log segment size in bytes.
    pub fn lg_max(&self) -> Result<Option<u32>> {
        self.parse_u32("set_lg_max")
    }

    fn parse_u32(&self, name: &str) -> Result<Option<u32>> {
        let Some(values) = self.get(name) else {
            return Ok(None);
        };
        let raw = values
            .first()
            .ok_or_else(|| Error::InvalidArgument(format!("{name} requires a value")))?;
        raw.parse::<u32>()
            .map(Some)
            .map_err(|_| Error::InvalidArgument(format!("{name}: {raw:?} is not a valid integer")))
    }
}
