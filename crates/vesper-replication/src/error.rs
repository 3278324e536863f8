use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("kernel error applying streamed command: {0}")]
    Kernel(#[from] vesper_kernel::KernelError),
    #[error("wire protocol error: {0}")]
    Wire(#[from] vesper_wire::WireError),
    #[error("persistence codec error: {0}")]
    Persistence(#[from] vesper_persistence::PersistenceError),
    #[error("malformed SYNC bulk header")]
    BadBulkHeader,
    #[error("replica link is not in the expected state for this transition")]
    UnexpectedState,
}

pub type Result<T> = std::result::Result<T, ReplicationError>;
