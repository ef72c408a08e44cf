//! Error types for the archive crate.

use thiserror::Error;

/// Errors that can occur when reading archive tables and containers.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] avafs_common::Error),

    /// Invalid magic value.
    #[error("invalid signature: expected {expected:#010x}, got {actual:#010x}")]
    InvalidSignature { expected: u32, actual: u32 },

    /// Unsupported container version.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// Unsupported compression library.
    #[error("unsupported compression library: {0}")]
    UnsupportedCompression(u8),

    /// Decompression error.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Decompressed or mapped size does not match the declared size.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Compression block index points outside the block table.
    #[error("compression block {index} out of range ({count} blocks)")]
    BlockOutOfRange { index: usize, count: usize },

    /// A compression block claims zero uncompressed bytes.
    #[error("compression block {0} is empty")]
    EmptyBlock(usize),

    /// Entry not found.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// Entry data lies outside the buffer.
    #[error("entry \"{name}\" out of bounds: {offset}+{size} > {len}")]
    EntryOutOfBounds {
        name: String,
        offset: u32,
        size: u32,
        len: usize,
    },
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
