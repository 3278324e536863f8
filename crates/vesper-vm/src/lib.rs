//! # vesper-vm: optional value-swapping (virtual memory) subsystem
//!
//! Implements spec §4.9: when enabled, values that haven't been touched
//! recently are serialized to a fixed-size page file and evicted from
//! memory, then transparently reloaded on the next access. This subsystem
//! is explicitly optional (spec §4.9's Non-goals: a conforming server MAY
//! omit it entirely) — `vesper-server` only calls into this crate at all
//! when `vm-enabled yes` is configured.
//!
//! [`engine::VmEngine`] is the crate's single entry point; everything else
//! here is a building block it composes.

mod access_tracker;
mod engine;
mod error;
mod jobs;
mod page_allocator;
mod swap_table;

pub use access_tracker::{approx_size, AccessTracker};
pub use engine::{VmConfig, VmEngine, VmEvent};
pub use error::{Result, VmError};
pub use jobs::{JobExecutor, JobId, JobKind, JobOutcome, WorkerPool};
pub use page_allocator::PageAllocator;
pub use swap_table::{Residency, SwapEntry, SwapTable};
