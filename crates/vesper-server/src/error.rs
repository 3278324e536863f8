//! Server-level error types — failures that never reach a client as a
//! RESP reply (those are [`vesper_kernel::KernelError`]'s job), only ones
//! that abort startup or a connection.

use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("i/o backend error: {0}")]
    IoBackend(#[from] vesper_io::IoError),

    #[error("persistence error: {0}")]
    Persistence(#[from] vesper_persistence::PersistenceError),

    #[error("vm error: {0}")]
    Vm(#[from] vesper_vm::VmError),

    #[error("config error: {0}")]
    Config(#[from] vesper_config::ConfigError),

    #[error("fatal startup error: {0}")]
    Fatal(String),
}
