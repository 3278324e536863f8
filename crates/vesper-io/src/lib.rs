//! # vesper-io: I/O backend abstraction for Vesper
//!
//! This crate provides a trait-based abstraction over file I/O operations,
//! shared by the RDB/AOF persistence layer and the VM swap-file subsystem:
//!
//! - **`SyncBackend`** (default): Standard `std::fs` operations with optional
//!   `O_DIRECT` on Linux (via the `direct_io` feature)
//! - **Future**: `io_uring` backend for async I/O on Linux
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐  ┌────────────────────┐
//! │ vesper-persistence  │  │     vesper-vm       │
//! │ (RDB/AOF files)      │  │ (swap-file pages)   │
//! └──────────┬──────────┘  └──────────┬──────────┘
//!            │         uses IoBackend │
//!            └───────────┬────────────┘
//!                 ┌───────┴───────┐
//!                 │   vesper-io   │
//!                 │ ┌─────┐┌─────┐│
//!                 │ │Sync ││ Dir. ││
//!                 │ └─────┘└─────┘│
//!                 └───────────────┘
//! ```
//!
//! # Features
//!
//! - `direct_io`: Enable `O_DIRECT` support on Linux (requires `libc`)

mod aligned;
mod backend;
mod error;
mod sync_backend;

pub use aligned::{AlignedBuffer, BLOCK_ALIGNMENT};
pub use backend::{FileHandle, IoBackend, OpenFlags};
pub use error::IoError;
pub use sync_backend::SyncBackend;

#[cfg(test)]
mod tests;
