//! Error types for the resource layer.

use thiserror::Error;

use avafs_common::NameHash;

/// Errors that can occur while resolving and loading resources.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive format error.
    #[error("{0}")]
    Archive(#[from] avafs_archive::Error),

    /// Name not known to the dictionary, any archive or any loaded container.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Hash not known to the dictionary or any candidate archive.
    #[error("resource not found: {0}")]
    HashNotFound(NameHash),

    /// The `.tab`/`.arc` pair of an archive is missing.
    #[error("archive \"{0}\" is missing its table or data file")]
    MissingArchive(String),

    /// Entry has no data.
    #[error("entry {0} in archive \"{1}\" is empty")]
    EmptyEntry(NameHash, String),

    /// Table disagrees with itself about how large an entry is.
    #[error("table of \"{archive}\" is corrupt: entry {hash} needs {required} bytes but stores {size}")]
    TableCorrupt {
        archive: String,
        hash: NameHash,
        required: u64,
        size: u32,
    },

    /// The dictionary source could not be parsed.
    #[error("malformed dictionary: {0}")]
    Dictionary(String),

    /// A dictionary has already been loaded.
    #[error("dictionary already loaded")]
    DictionaryAlreadyLoaded,

    /// Two format handlers claim the same extension.
    #[error("extension \"{0}\" is already registered")]
    DuplicateExtension(String),

    /// No fallback format handler is registered.
    #[error("no fallback format handler registered")]
    MissingFallback,

    /// Container is still being decompressed.
    #[error("archive \"{0}\" is still loading")]
    Pending(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Dictionary(err.to_string())
    }
}

/// Result type for resource operations.
pub type Result<T> = std::result::Result<T, Error>;
