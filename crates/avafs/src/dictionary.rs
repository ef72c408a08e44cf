//! Resource dictionary: which archives may hold a given resource.

use std::fmt;

use rustc_hash::FxHashMap;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};

use avafs_common::NameHash;

use crate::tree::DirectoryTree;
use crate::Result;

/// A dictionary record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryEntry {
    /// Full resource name.
    pub name: String,
    /// Candidate archive base names, most likely first.
    pub archives: Vec<String>,
}

/// Read-only map from name hash to candidate archives.
///
/// Built once and shared; there is no way to mutate it after construction.
/// When two names collide on the same hash the first one in the source wins.
#[derive(Debug, Default)]
pub struct Dictionary {
    entries: FxHashMap<NameHash, DictionaryEntry>,
    tree: DirectoryTree,
}

impl Dictionary {
    /// Parse a JSON object of `name -> [archive, ...]`.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let raw: OrderedEntries = serde_json::from_slice(data)?;
        Ok(Self::from_entries(raw.0))
    }

    /// Build from `(name, archives)` pairs in priority order.
    pub fn from_entries<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let iter = iter.into_iter();
        let mut entries = FxHashMap::with_capacity_and_hasher(iter.size_hint().0, Default::default());
        let mut tree = DirectoryTree::new();
        let mut collisions = 0usize;

        for (name, archives) in iter {
            let hash = NameHash::from_name(&name);
            if entries.contains_key(&hash) {
                collisions += 1;
                tracing::debug!(%hash, name = %name, "hash collision, keeping first entry");
                continue;
            }
            tree.insert(&name);
            entries.insert(hash, DictionaryEntry { name, archives });
        }

        tree.sort();

        tracing::info!(entries = entries.len(), collisions, "dictionary loaded");

        Self { entries, tree }
    }

    /// Look up a hash.
    #[inline]
    pub fn get(&self, hash: NameHash) -> Option<&DictionaryEntry> {
        self.entries.get(&hash)
    }

    /// Candidate archives for `hash`, empty if unknown.
    pub fn archives(&self, hash: NameHash) -> &[String] {
        self.get(hash).map_or(&[], |e| e.archives.as_slice())
    }

    /// Reverse lookup of a hash to its resource name.
    pub fn name(&self, hash: NameHash) -> Option<&str> {
        self.get(hash).map(|e| e.name.as_str())
    }

    /// Sorted tree of every dictionary name.
    #[inline]
    pub fn tree(&self) -> &DirectoryTree {
        &self.tree
    }

    /// Number of distinct hashes.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// JSON object entries in document order.
struct OrderedEntries(Vec<(String, Vec<String>)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping resource names to archive lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Vec<String>>()? {
                    entries.push(entry);
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
