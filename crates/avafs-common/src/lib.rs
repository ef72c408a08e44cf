//! Common utilities for avafs.
//!
//! This crate provides the foundational pieces shared by the archive readers
//! and the resource layer:
//!
//! - [`BinaryReader`] - Zero-copy little-endian reading from byte slices
//! - [`hash`] - The 32-bit resource name hash (`hashlittle`)

mod error;
mod reader;

pub mod hash;

pub use error::{Error, Result};
pub use hash::NameHash;
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
