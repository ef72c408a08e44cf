//! Dispatch from file type to the handler that opens it.
//!
//! Handlers are keyed by extension hash. Handlers without extensions are
//! keyed by the magic of the files they accept, and exactly one fallback
//! handler takes whatever nothing else claims.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use avafs_common::hash::extension_hash;
use avafs_common::BinaryReader;

use crate::resource::{ResourceBuffer, ResourceManager};
use crate::{Error, Result};

/// Magic reported by the fallback handler.
pub const FALLBACK_MAGIC: u32 = 0x1122_3344;

/// Magic reported by handlers that do not identify files by content.
pub const NO_MAGIC: u32 = 0xFFFF_FFFF;

/// Something that can open a family of resources.
pub trait FormatHandler: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Extensions handled, without the leading dot.
    fn extensions(&self) -> &[&str] {
        &[]
    }

    /// Little-endian u32 the files of this format start with.
    fn header_magic(&self) -> u32 {
        NO_MAGIC
    }

    /// Open `name`. Opening an already open resource succeeds.
    fn load(&self, name: &str) -> Result<()>;

    /// Close `name` if open.
    fn unload(&self, name: &str);

    /// Whether `name` is open.
    fn is_loaded(&self, name: &str) -> bool;

    /// Hand back the bytes of an open resource unchanged.
    fn save(&self, name: &str) -> Result<Vec<u8>>;

    /// Per-tick work.
    fn update(&self) {}
}

/// Registered format handlers.
#[derive(Default)]
pub struct FormatRegistry {
    handlers: Vec<Arc<dyn FormatHandler>>,
    by_key: FxHashMap<u32, Arc<dyn FormatHandler>>,
    fallback: Option<Arc<dyn FormatHandler>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    ///
    /// Fails without registering anything if one of its extensions is
    /// already taken.
    pub fn register(&mut self, handler: Arc<dyn FormatHandler>) -> Result<()> {
        let magic = handler.header_magic();

        if magic == FALLBACK_MAGIC {
            if let Some(previous) = self.fallback.replace(Arc::clone(&handler)) {
                warn!(previous = previous.name(), "replacing fallback format handler");
                self.handlers.retain(|h| !Arc::ptr_eq(h, &previous));
            }
            self.handlers.push(handler);
            return Ok(());
        }

        let extensions = handler.extensions();

        if extensions.is_empty() {
            if self.by_key.contains_key(&magic) {
                warn!(handler = handler.name(), magic, "magic already registered");
            }
            self.by_key.insert(magic, Arc::clone(&handler));
        } else {
            let hashes: Vec<u32> = extensions.iter().map(|ext| extension_hash(ext)).collect();

            for (ext, hash) in extensions.iter().zip(&hashes) {
                if self.by_key.contains_key(hash) {
                    return Err(Error::DuplicateExtension((*ext).to_owned()));
                }
            }
            for hash in hashes {
                self.by_key.insert(hash, Arc::clone(&handler));
            }
        }

        debug!(handler = handler.name(), ?extensions, "registered format handler");
        self.handlers.push(handler);
        Ok(())
    }

    /// Handler registered for an extension hash.
    pub fn get_format_handler(&self, extension_hash: u32) -> Option<&Arc<dyn FormatHandler>> {
        self.by_key.get(&extension_hash)
    }

    /// Pick a handler by reading the first four bytes of `path`.
    ///
    /// Handlers are tried in registration order; the fallback is returned
    /// when none match.
    pub fn get_format_handler_for_file(
        &self,
        resources: &ResourceManager,
        path: &str,
    ) -> Result<&Arc<dyn FormatHandler>> {
        let fallback = self.fallback.as_ref().ok_or(Error::MissingFallback)?;
        let buffer = resources.read(path)?;

        let Ok(magic) = BinaryReader::new(&buffer).peek_u32() else {
            return Ok(fallback);
        };

        Ok(self
            .handlers
            .iter()
            .filter(|h| !Arc::ptr_eq(*h, fallback))
            .find(|h| h.header_magic() != NO_MAGIC && h.header_magic() == magic)
            .unwrap_or(fallback))
    }

    /// Check that a fallback handler is registered.
    pub fn validate(&self) -> Result<()> {
        match self.fallback {
            Some(_) => Ok(()),
            None => Err(Error::MissingFallback),
        }
    }

    /// Run per-tick work on every handler.
    pub fn update(&self) {
        for handler in &self.handlers {
            handler.update();
        }
    }

    /// Handlers in registration order.
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn FormatHandler>> {
        self.handlers.iter()
    }
}

/// Keeps the raw bytes of anything no other handler understands.
pub struct FallbackHandler {
    resources: Arc<ResourceManager>,
    loaded: Mutex<FxHashMap<String, ResourceBuffer>>,
}

impl FallbackHandler {
    pub fn new(resources: Arc<ResourceManager>) -> Self {
        Self {
            resources,
            loaded: Mutex::new(FxHashMap::default()),
        }
    }
}

impl FormatHandler for FallbackHandler {
    fn name(&self) -> &str {
        "fallback"
    }

    fn header_magic(&self) -> u32 {
        FALLBACK_MAGIC
    }

    fn load(&self, name: &str) -> Result<()> {
        if self.is_loaded(name) {
            return Ok(());
        }

        let buffer = self.resources.read(name)?;
        self.loaded.lock().insert(name.to_owned(), buffer);
        Ok(())
    }

    fn unload(&self, name: &str) {
        self.loaded.lock().remove(name);
    }

    fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().contains_key(name)
    }

    fn save(&self, name: &str) -> Result<Vec<u8>> {
        self.loaded
            .lock()
            .get(name)
            .map(|buffer| buffer.to_vec())
            .ok_or_else(|| Error::NotFound(name.to_owned()))
    }
}
