//! # vesper-kernel: value object model and command engine for Vesper
//!
//! This crate owns everything that runs on the main thread between "a
//! request was parsed" and "a reply was produced": the per-type value
//! objects and their encodings, the per-database keyspace (with expiry,
//! blocking-key, and WATCH bookkeeping), the sorted-set skiplist, the
//! command table, and every command handler.
//!
//! It has no knowledge of sockets, files, or other processes — those live
//! in `vesper-server`, `vesper-persistence`, and `vesper-replication`
//! respectively. A [`Database`] is a plain in-memory structure; callers
//! drive it by parsing a request into argv and running it through
//! [`dispatch::Dispatcher::execute`].

pub mod command;
pub mod database;
pub mod dict;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod object;
pub mod skiplist;

pub mod commands;

pub use database::Database;
pub use dispatch::{CommandTable, Dispatcher, ExecOutcome};
pub use error::KernelError;
pub use object::{Value, ValueData};
pub use vesper_types::Encoding;
