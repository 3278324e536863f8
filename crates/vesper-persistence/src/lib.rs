//! # vesper-persistence: RDB snapshots and append-only file durability
//!
//! Two independent durability mechanisms, both described in spec §4.6:
//!
//! - [`rdb`]: a point-in-time binary snapshot of every database, loaded at
//!   startup and written by `SAVE`/`BGSAVE`.
//! - [`aof`]: a running log of every write command, replayed at startup and
//!   appended to after every write when enabled.
//!
//! Neither module touches a socket or a live [`vesper_kernel::Dispatcher`];
//! `vesper-server` owns wiring this crate into the event loop (when to save,
//! when to fsync, how to apply a loaded entry back into a `Database`).

pub mod aof;
mod error;
pub mod length;
pub mod rdb;

pub use aof::{rewrite, rewrite_for_aof, AofWriter, FsyncPolicy};
pub use error::{PersistenceError, Result};
pub use rdb::{decode_rdb, encode_rdb, LoadedEntry, MAGIC};
