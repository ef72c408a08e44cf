//! avafs - resource resolution for Avalanche engine games.
//!
//! Turns a logical resource name into bytes, wherever they live: loose on
//! disk, inside an indexed archive volume, or inside a stream archive that
//! is itself a resource and has to be inflated first.
//!
//! # Crates
//!
//! - [`avafs_common`] - Binary reading and the resource name hash
//! - [`avafs_archive`] - Archive tables, AAF containers and stream archives
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use avafs::prelude::*;
//!
//! let mut resources = ResourceManager::new("/games/JustCause4/archives_win64/main");
//! resources.set_flags(Game::JustCause4.flags());
//! resources.load_dictionary(&std::fs::read("dictionary.json")?)?;
//! let resources = Arc::new(resources);
//!
//! let bytes = resources.read("settings/hp_settings/player.bin")?;
//! println!("{} bytes", bytes.len());
//!
//! let loader = NestedArchiveLoader::new(Arc::clone(&resources))?;
//! loader.load("locations/world.ee")?;
//! while loader.update().is_none() {
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;

pub mod dictionary;
pub mod format;
pub mod nested;
pub mod resource;
pub mod tree;

pub use avafs_archive as archive;
pub use avafs_common as common;

pub use dictionary::{Dictionary, DictionaryEntry};
pub use error::{Error, Result};
pub use format::{FallbackHandler, FormatHandler, FormatRegistry};
pub use nested::{LoadOutcome, LoadState, NestedArchiveLoader};
pub use resource::{Flags, Game, ReadMiddleware, ResourceBuffer, ResourceManager};
pub use tree::DirectoryTree;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Dictionary, DirectoryTree, FallbackHandler, FormatHandler, FormatRegistry, Game,
        LoadOutcome, LoadState, NestedArchiveLoader, ResourceBuffer, ResourceManager,
    };
    pub use avafs_archive::{ArchiveTable, TableLayout};
    pub use avafs_common::NameHash;
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
