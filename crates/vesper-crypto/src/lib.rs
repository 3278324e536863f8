//! # vesper-crypto: checksums and digests for Vesper
//!
//! - [`crc32`]: table-driven CRC32 for AOF/RDB record integrity.
//! - [`digest`]: SHA-1-based dataset digest mixing used by `DEBUG DIGEST`.

pub mod crc32;
pub mod digest;

pub use crc32::{Crc32, crc32};
pub use digest::{Mixed, feedback_mix};
