//! # vesper
//!
//! The top-level crate for the Vesper server: it re-exports the pieces a
//! caller assembling a server needs and owns nothing of its own. The
//! binary (`src/main.rs`) is the only thing in this crate with actual
//! logic — the `init_config -> init_server -> run_loop -> shutdown`
//! sequencing from spec §9.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                           vesper                            │
//! │  ┌───────────┐   ┌───────────┐   ┌──────────────────────┐  │
//! │  │  config   │ → │  server   │ → │ kernel/persistence/  │  │
//! │  │(directives)│   │(mio loop) │   │ replication/vm/wire  │  │
//! │  └───────────┘   └───────────┘   └──────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```

pub use vesper_config::{ConfigError, ServerConfig};
pub use vesper_server::{Server, ServerError, ServerResult, ShutdownHandle};
pub use vesper_types::{ClientId, DbIndex, UnixTime};
