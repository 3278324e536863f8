//! # vesper-server: the network-facing event loop
//!
//! This crate owns every socket: the listener, each client connection, the
//! replica link (if this process is a replica), and the signal handlers.
//! It has no notion of RESP commands on its own — [`handler`] is the only
//! module that calls into `vesper-kernel`'s [`vesper_kernel::Dispatcher`]
//! and turns the result back into bytes on a client's output buffer.
//!
//! ## Architecture
//!
//! The event loop in [`server::Server::run`] is a single-threaded `mio`
//! poll loop. There is no async runtime and no per-connection thread; the
//! only extra OS thread this crate ever spawns is the one BGSAVE/
//! BGREWRITEAOF background save runs on, and that thread touches nothing
//! but a cloned [`vesper_kernel::Database`] snapshot and a file.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       vesper-server                       │
//! │  ┌───────────┐   ┌────────────┐   ┌─────────────────┐    │
//! │  │ Listener  │ → │  Clients   │ → │    handler       │    │
//! │  │ (TCP)     │   │ (mio poll) │   │ (→ vesper-kernel) │    │
//! │  └───────────┘   └────────────┘   └─────────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod buffer_pool;
mod connection;
mod error;
mod handler;
pub mod pubsub;
mod replica;
mod server;

pub use buffer_pool::BytesMutPool;
pub use error::{ServerError, ServerResult};
pub use server::{Server, ShutdownHandle};
