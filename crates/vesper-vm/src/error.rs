//! Error taxonomy for the VM swap subsystem (spec §4.9, §7's "Fatal" row:
//! "swap-file write error" is listed as abort-worthy; this crate only
//! reports the failure as a [`VmError`]/[`crate::engine::VmEvent`] and
//! leaves the abort decision to `vesper-server`, which owns process exit).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("io error: {0}")]
    Io(#[from] vesper_io::IoError),

    #[error("persistence codec error: {0}")]
    Persistence(#[from] vesper_persistence::PersistenceError),

    #[error("swap file exhausted: need {needed} pages")]
    SwapFileFull { needed: u64 },

    #[error("key is not currently swapped")]
    NotSwapped,
}

pub type Result<T> = std::result::Result<T, VmError>;
