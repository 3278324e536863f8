//! Error taxonomy for RDB/AOF persistence (spec §4.6, §7's "Fatal" row).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] vesper_io::IoError),

    #[error("corrupt RDB: {0}")]
    CorruptRdb(String),

    #[error("corrupt AOF: {0}")]
    CorruptAof(String),

    #[error("unsupported RDB version: {0}")]
    UnsupportedVersion(String),

    #[error("lz4 compression error: {0}")]
    Compression(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
