//! Readers for the Avalanche engine archive formats.
//!
//! Game resources are shipped in three layers of container:
//!
//! - Archive tables (`.tab`) index a data volume (`.arc`) by name hash. Two
//!   historical layouts exist; both are normalized into [`TableEntry`] at
//!   parse time so callers never branch on the layout again.
//! - Stream archives (`SARC`) are nested containers found inside the volumes,
//!   optionally wrapped in a compressed `AAF` envelope and optionally patched
//!   by a `.toc` overlay.
//! - Entry data may be compressed in one or more blocks; decompression goes
//!   through the [`Codec`] trait so proprietary libraries can be plugged in.
//!
//! # Example
//!
//! ```no_run
//! use avafs_archive::{decompress_entry, ArchiveTable, DefaultCodec, TableLayout};
//! use avafs_common::NameHash;
//!
//! let tab = std::fs::read("game0.tab")?;
//! let table = ArchiveTable::parse(&tab, TableLayout::Current)?;
//!
//! if let Some(entry) = table.find(NameHash::from_name("models/foo.mesh")) {
//!     let arc = std::fs::read("game0.arc")?;
//!     let start = entry.offset as usize;
//!     let data = &arc[start..start + entry.size as usize];
//!     let bytes = decompress_entry(&DefaultCodec, entry, table.blocks(), data)?;
//!     println!("{} bytes", bytes.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod aaf;
mod codec;
mod decompress;
mod error;
pub mod sarc;
pub mod table;

pub use codec::{Codec, DefaultCodec};
pub use decompress::decompress_entry;
pub use error::{Error, Result};
pub use sarc::{ArchiveEntry, OverlayStats, StreamArchive};
pub use table::{ArchiveTable, CompressionBlock, CompressionLibrary, TableEntry, TableLayout};
