//! Resource resolution: name → candidate archives → bytes.

use std::fs::{self, File};
use std::ops::{BitOr, Deref};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use avafs_archive::{decompress_entry, ArchiveTable, Codec, DefaultCodec, TableLayout};
use avafs_common::NameHash;

use crate::dictionary::Dictionary;
use crate::tree::DirectoryTree;
use crate::{Error, Result};

/// Behaviour switches for a [`ResourceManager`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u32);

impl Flags {
    /// Archive tables use the legacy layout.
    pub const LEGACY_ARCHIVE_TABLE: Self = Self(1 << 0);

    /// No flags set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Table layout selected by these flags.
    pub const fn table_layout(self) -> TableLayout {
        if self.contains(Self::LEGACY_ARCHIVE_TABLE) {
            TableLayout::Legacy
        } else {
            TableLayout::Current
        }
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Supported games.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Game {
    JustCause3,
    JustCause4,
}

impl Game {
    /// Resource manager flags for this game.
    pub const fn flags(self) -> Flags {
        match self {
            Self::JustCause3 => Flags::LEGACY_ARCHIVE_TABLE,
            Self::JustCause4 => Flags::empty(),
        }
    }
}

impl FromStr for Game {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jc3" | "justcause3" => Ok(Self::JustCause3),
            "jc4" | "justcause4" => Ok(Self::JustCause4),
            other => Err(format!("unknown game \"{other}\" (expected jc3 or jc4)")),
        }
    }
}

/// Bytes of a resolved resource.
///
/// Uncompressed archive entries and disk files are handed out as read-only
/// mappings; anything that had to be decompressed is owned.
#[derive(Debug)]
pub enum ResourceBuffer {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl ResourceBuffer {
    /// Copy out into an owned vector.
    pub fn into_vec(self) -> Vec<u8> {
        match self {
            Self::Mapped(mmap) => mmap.to_vec(),
            Self::Owned(bytes) => bytes,
        }
    }
}

impl Deref for ResourceBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => mmap,
            Self::Owned(bytes) => bytes,
        }
    }
}

impl AsRef<[u8]> for ResourceBuffer {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl From<Vec<u8>> for ResourceBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Owned(bytes)
    }
}

/// A hook offered every name-based read before the dictionary is consulted.
pub trait ReadMiddleware: Send + Sync {
    /// Return the bytes for `name`, or `None` to let the next source try.
    fn read(&self, name: &str) -> Option<ResourceBuffer>;
}

/// Resolves resource names to bytes.
///
/// Configure with [`set_base_path`](Self::set_base_path),
/// [`set_flags`](Self::set_flags) and
/// [`load_dictionary`](Self::load_dictionary), then share behind an `Arc`.
pub struct ResourceManager {
    base_path: PathBuf,
    flags: Flags,
    dictionary: Option<Arc<Dictionary>>,
    codec: Arc<dyn Codec>,
    middlewares: RwLock<Vec<Arc<dyn ReadMiddleware>>>,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self {
            base_path: PathBuf::new(),
            flags: Flags::empty(),
            dictionary: None,
            codec: Arc::new(DefaultCodec),
            middlewares: RwLock::new(Vec::new()),
        }
    }
}

impl ResourceManager {
    /// Create a manager rooted at `base_path`.
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Replace the codec used for compressed entries.
    pub fn with_codec<C: Codec + 'static>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Directory containing the archives.
    pub fn set_base_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.base_path = path.into();
    }

    /// Current base path.
    #[inline]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Select behaviour, most importantly the table layout.
    pub fn set_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    /// Current flags.
    #[inline]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// The codec used for compressed entries.
    #[inline]
    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Parse and install the dictionary. Only one load is allowed.
    pub fn load_dictionary(&mut self, source: &[u8]) -> Result<()> {
        if self.dictionary.is_some() {
            return Err(Error::DictionaryAlreadyLoaded);
        }

        info!("loading dictionary");
        let dictionary = Dictionary::from_json(source)?;
        self.dictionary = Some(Arc::new(dictionary));
        Ok(())
    }

    /// Install an already built dictionary. Only one is allowed.
    pub fn set_dictionary(&mut self, dictionary: Arc<Dictionary>) -> Result<()> {
        if self.dictionary.is_some() {
            return Err(Error::DictionaryAlreadyLoaded);
        }
        self.dictionary = Some(dictionary);
        Ok(())
    }

    /// The loaded dictionary, if any.
    #[inline]
    pub fn dictionary(&self) -> Option<&Arc<Dictionary>> {
        self.dictionary.as_ref()
    }

    /// Tree of every dictionary name, if a dictionary is loaded.
    pub fn dictionary_tree(&self) -> Option<&DirectoryTree> {
        self.dictionary.as_deref().map(Dictionary::tree)
    }

    /// Register a hook consulted by [`read`](Self::read) before the
    /// dictionary.
    pub fn register_middleware(&self, middleware: Arc<dyn ReadMiddleware>) {
        self.middlewares.write().push(middleware);
    }

    /// Read a resource by name.
    pub fn read(&self, name: &str) -> Result<ResourceBuffer> {
        // Snapshot so middlewares may take their own locks.
        let middlewares = self.middlewares.read().clone();
        for middleware in &middlewares {
            if let Some(buffer) = middleware.read(name) {
                debug!(name, "served by middleware");
                return Ok(buffer);
            }
        }

        match self.read_hash(NameHash::from_name(name)) {
            Err(Error::HashNotFound(_)) => Err(Error::NotFound(name.to_owned())),
            other => other,
        }
    }

    /// Read a resource by name hash, trying each candidate archive in order.
    pub fn read_hash(&self, hash: NameHash) -> Result<ResourceBuffer> {
        let archives = self
            .dictionary
            .as_deref()
            .map(|d| d.archives(hash))
            .unwrap_or_default();

        if archives.is_empty() {
            debug!(%hash, "not in dictionary");
        }

        for archive in archives {
            info!(%hash, %archive, "reading from archive");
            match self.read_from_archive(archive, hash) {
                Ok(buffer) => return Ok(buffer),
                Err(err @ Error::TableCorrupt { .. }) => {
                    error!(%hash, %archive, "{err}");
                    return Err(err);
                }
                Err(err) => debug!(%hash, %archive, "archive miss: {err}"),
            }
        }

        Err(Error::HashNotFound(hash))
    }

    /// Map a file under the base path.
    pub fn read_from_disk(&self, name: &str) -> Result<ResourceBuffer> {
        let path = self.base_path.join(name);
        let file = File::open(&path)?;

        if file.metadata()?.len() == 0 {
            warn!(path = %path.display(), "file is empty");
            return Err(Error::NotFound(name.to_owned()));
        }

        let mmap = unsafe { Mmap::map(&file)? };
        Ok(ResourceBuffer::Mapped(mmap))
    }

    /// Read one entry from `<archive>.tab` / `<archive>.arc`.
    ///
    /// The table is parsed on every call.
    pub fn read_from_archive(&self, archive: &str, hash: NameHash) -> Result<ResourceBuffer> {
        let tab_path = self.archive_path(archive, "tab");
        let arc_path = self.archive_path(archive, "arc");

        if !tab_path.is_file() || !arc_path.is_file() {
            warn!(
                tab = %tab_path.display(),
                arc = %arc_path.display(),
                "can't find arc/tab file"
            );
            return Err(Error::MissingArchive(archive.to_owned()));
        }

        let table = ArchiveTable::parse(&fs::read(&tab_path)?, self.flags.table_layout())?;
        let entry = *table.find(hash).ok_or(Error::HashNotFound(hash))?;

        if entry.size == 0 {
            warn!(%hash, archive, "entry is empty");
            return Err(Error::EmptyEntry(hash, archive.to_owned()));
        }

        let file = File::open(&arc_path)?;
        let end = entry.offset as u64 + entry.size as u64;
        let file_len = file.metadata()?.len();
        if end > file_len {
            return Err(avafs_archive::Error::EntryOutOfBounds {
                name: hash.to_string(),
                offset: entry.offset,
                size: entry.size,
                len: file_len as usize,
            }
            .into());
        }

        // The range was checked against the file length above.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(entry.offset as u64)
                .len(entry.size as usize)
                .map(&file)?
        };

        if !entry.is_compressed() {
            return Ok(ResourceBuffer::Mapped(mmap));
        }

        let required = table.required_buffer_size(&entry)?;
        if required != entry.size as u64 {
            return Err(Error::TableCorrupt {
                archive: archive.to_owned(),
                hash,
                required,
                size: entry.size,
            });
        }

        info!(
            size = entry.size,
            uncompressed_size = entry.uncompressed_size,
            required,
            "entry is compressed"
        );

        let bytes = decompress_entry(self.codec.as_ref(), &entry, table.blocks(), &mmap)?;
        Ok(ResourceBuffer::Owned(bytes))
    }

    fn archive_path(&self, archive: &str, extension: &str) -> PathBuf {
        self.base_path.join(format!("{archive}.{extension}"))
    }
}
