//! Error kinds shared by every subsystem.
//!
//! The source system keeps a single process-wide "panicked" flag: once any
//! subsystem detects a broken invariant, every later call fails with
//! [`Error::Panic`] until the environment is refreshed or removed. We model
//! that with [`crate::env::Environment::is_panicked`] rather than baking it
//! into this enum.

use std::io;
use std::path::PathBuf;

use crate::lsn::Lsn;

/// The kinds of errors the core can report, per spec.md §7.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("deadlock detected")]
    Deadlock,

    #[error("corruption at {where_}: {detail}")]
    Corruption { where_: String, detail: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },

    #[error("environment is panicked; refresh or remove before continuing")]
    Panic,

    #[error("operation was interrupted")]
    Interrupted,

    #[error("environment has open handles or live transactions")]
    HandlesOpen,
}

impl Error {
    pub fn io(source: io::Error) -> Self {
        Error::Io { path: None, source }
    }

    pub fn io_at(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: Some(path.into()),
            source,
        }
    }

    pub fn corruption(where_: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Corruption {
            where_: where_.into(),
            detail: detail.into(),
        }
    }

    pub fn not_found_lsn(lsn: Lsn) -> Self {
        Error::NotFound(format!("lsn {lsn:?}"))
    }

    /// Whether this error is tolerated by a given recovery opcode rather
    /// than escalating to [`Error::Panic`] (spec.md §7 propagation policy).
    pub fn tolerated_during_recovery(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
