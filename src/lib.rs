//! wald: the crash-recovery substrate of a transactional, embedded
//! key/value storage engine --- write-ahead log, record dispatcher,
//! file-operation journal, and environment/recovery driver.
//!
//! What this crate is *not*: a query engine, an index structure, a page
//! cache, a replication layer, or a CLI. Those are meant to be built on
//! top of [`env::Environment`] and [`dispatch::Dispatcher`].

pub mod dispatch;
pub mod env;
pub mod error;
pub mod fid;
pub mod fop;
pub mod interrupt;
pub mod log;
pub mod lsn;
pub mod pages;
pub mod panic_flag;
pub mod region;
pub mod txn;

pub use dispatch::{DispatchCtx, Dispatcher, Opcode};
pub use env::{DbConfig, Environment, OpenFlags};
pub use error::{Error, Result};
pub use fid::Fid;
pub use lsn::Lsn;
