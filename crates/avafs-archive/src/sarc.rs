//! Stream archives (`SARC`) and their `.toc` overlays.
//!
//! A stream archive is a flat directory of named entries followed by their
//! data, all in one buffer. Two directory versions exist:
//!
//! - Version 2 stores each name inline with its offset and size.
//! - Version 3 stores a block of null-terminated names followed by fixed
//!   records that point into it.
//!
//! A `.toc` overlay shipped next to an archive can move existing entries
//! (to patched data elsewhere) and add new ones.

use std::collections::HashMap;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use avafs_common::BinaryReader;

use crate::{Error, Result};

/// "SARC" read as a little-endian u32.
pub const SARC_MAGIC: u32 = 0x4352_4153;

/// Stream archive header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct SarcHeader {
    /// Always 4.
    pub magic_length: u32,
    pub magic: u32,
    pub version: u32,
    /// Size of the directory that follows the header.
    pub size: u32,
}

/// Version 3 directory record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct SarcRecord {
    pub name_offset: u32,
    pub offset: u32,
    pub size: u32,
    pub name_hash: u32,
    pub extension_hash: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<SarcHeader>();

/// Smallest possible version 2 record (empty name).
const MIN_V2_RECORD: usize = 16;

/// An entry of a stream archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    /// Offset of the data in the archive buffer, 0 when stored elsewhere.
    pub offset: u32,
    pub size: u32,
    /// Whether a `.toc` overlay added this entry.
    pub patched: bool,
}

impl ArchiveEntry {
    /// Whether the data lives outside the archive buffer.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.offset == 0
    }
}

/// Result of merging an overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayStats {
    /// Entries that did not exist before.
    pub added: usize,
    /// Existing entries whose offset or size changed.
    pub patched: usize,
}

/// A parsed stream archive directory.
#[derive(Debug, Clone, Default)]
pub struct StreamArchive {
    version: u32,
    entries: Vec<ArchiveEntry>,
}

impl StreamArchive {
    /// Parse the directory of a decompressed stream archive.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);
        let header: SarcHeader = reader.read_struct()?;

        if header.magic_length != 4 || header.magic != SARC_MAGIC {
            return Err(Error::InvalidSignature {
                expected: SARC_MAGIC,
                actual: header.magic,
            });
        }

        let end = HEADER_SIZE + header.size as usize;
        let directory = data.get(..end).ok_or(avafs_common::Error::UnexpectedEof {
            needed: end,
            available: data.len(),
        })?;
        let reader = BinaryReader::new_at(directory, HEADER_SIZE);

        let version = header.version;
        let entries = match version {
            2 => parse_v2(reader)?,
            3 => parse_v3(reader)?,
            other => return Err(Error::UnsupportedVersion(other)),
        };

        tracing::debug!(version, entries = entries.len(), "parsed stream archive");

        Ok(Self { version, entries })
    }

    /// Directory version.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Entries in directory order, overlay additions last.
    #[inline]
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Find an entry by exact name.
    pub fn find(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Slice the data of `entry` out of the archive buffer.
    pub fn entry_data<'a>(&self, entry: &ArchiveEntry, buffer: &'a [u8]) -> Result<&'a [u8]> {
        if entry.is_external() {
            return Err(Error::EntryNotFound(entry.name.clone()));
        }

        let start = entry.offset as usize;
        let end = start + entry.size as usize;
        buffer.get(start..end).ok_or_else(|| Error::EntryOutOfBounds {
            name: entry.name.clone(),
            offset: entry.offset,
            size: entry.size,
            len: buffer.len(),
        })
    }

    /// Merge a `.toc` overlay into the directory.
    ///
    /// Existing names take the overlay's offset and size; unknown names are
    /// appended and marked as patched. The overlay is parsed in full before
    /// anything is merged, so a malformed overlay leaves the archive as is.
    pub fn apply_overlay(&mut self, toc: &[u8]) -> Result<OverlayStats> {
        let overlay = parse_overlay(toc)?;

        let mut index: HashMap<String, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();

        let mut stats = OverlayStats::default();

        for entry in overlay {
            match index.get(&entry.name) {
                Some(&i) => {
                    let existing = &mut self.entries[i];
                    if existing.offset != entry.offset || existing.size != entry.size {
                        stats.patched += 1;
                    }
                    existing.offset = entry.offset;
                    existing.size = entry.size;
                }
                None => {
                    index.insert(entry.name.clone(), self.entries.len());
                    self.entries.push(entry);
                    stats.added += 1;
                }
            }
        }

        Ok(stats)
    }
}

fn parse_v2(mut reader: BinaryReader<'_>) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();

    while reader.remaining() >= MIN_V2_RECORD {
        let length = reader.read_u32()? as usize;
        let name = reader.read_padded_string(length)?.to_owned();
        let offset = reader.read_u32()?;
        let size = reader.read_u32()?;

        entries.push(ArchiveEntry {
            name,
            offset,
            size,
            patched: false,
        });
    }

    Ok(entries)
}

fn parse_v3(mut reader: BinaryReader<'_>) -> Result<Vec<ArchiveEntry>> {
    let strings_length = reader.read_u32()? as usize;
    let strings = reader.read_bytes(strings_length)?;

    let record_size = std::mem::size_of::<SarcRecord>();
    let mut entries = Vec::with_capacity(reader.remaining() / record_size);

    while reader.remaining() >= record_size {
        let record: SarcRecord = reader.read_struct()?;
        let name = BinaryReader::new_at(strings, record.name_offset as usize)
            .read_cstring()?
            .to_owned();

        entries.push(ArchiveEntry {
            name,
            offset: record.offset,
            size: record.size,
            patched: false,
        });
    }

    Ok(entries)
}

fn parse_overlay(data: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut reader = BinaryReader::new(data);
    let mut entries = Vec::new();

    while !reader.is_empty() {
        let length = reader.read_u32()? as usize;
        let name = reader.read_padded_string(length)?.to_owned();
        let offset = reader.read_u32()?;
        let size = reader.read_u32()?;

        entries.push(ArchiveEntry {
            name,
            offset,
            size,
            patched: true,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use avafs_common::hash::{file_extension_hash, hash_str};

    /// Build a version 2 archive. Entry data is laid out after the
    /// directory, in order.
    fn build_sarc_v2(files: &[(&str, &[u8])]) -> Vec<u8> {
        // Names are padded to 4 bytes.
        let padded = |name: &str| name.len().next_multiple_of(4);
        let directory_size: usize = files.iter().map(|(n, _)| 12 + padded(n)).sum();

        let mut offset = HEADER_SIZE + directory_size;
        let mut directory = Vec::new();
        for (name, bytes) in files {
            directory.extend_from_slice(&(padded(name) as u32).to_le_bytes());
            directory.extend_from_slice(name.as_bytes());
            directory.resize(directory.len() + padded(name) - name.len(), 0);
            directory.extend_from_slice(&(offset as u32).to_le_bytes());
            directory.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            offset += bytes.len();
        }

        let header = SarcHeader {
            magic_length: 4,
            magic: SARC_MAGIC,
            version: 2,
            size: directory.len() as u32,
        };

        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(&directory);
        for (_, bytes) in files {
            data.extend_from_slice(bytes);
        }
        data
    }

    fn build_sarc_v3(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut strings = Vec::new();
        let mut name_offsets = Vec::new();
        for (name, _) in files {
            name_offsets.push(strings.len() as u32);
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
        }

        let record_size = std::mem::size_of::<SarcRecord>();
        let directory_size = 4 + strings.len() + files.len() * record_size;
        let mut offset = HEADER_SIZE + directory_size;

        let mut directory = (strings.len() as u32).to_le_bytes().to_vec();
        directory.extend_from_slice(&strings);
        for ((name, bytes), name_offset) in files.iter().zip(&name_offsets) {
            let record = SarcRecord {
                name_offset: *name_offset,
                offset: offset as u32,
                size: bytes.len() as u32,
                name_hash: hash_str(name),
                extension_hash: file_extension_hash(name),
            };
            directory.extend_from_slice(record.as_bytes());
            offset += bytes.len();
        }

        let header = SarcHeader {
            magic_length: 4,
            magic: SARC_MAGIC,
            version: 3,
            size: directory.len() as u32,
        };

        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(&directory);
        for (_, bytes) in files {
            data.extend_from_slice(bytes);
        }
        data
    }

    fn build_toc(entries: &[(&str, u32, u32)]) -> Vec<u8> {
        let mut data = Vec::new();
        for (name, offset, size) in entries {
            data.extend_from_slice(&(name.len() as u32).to_le_bytes());
            data.extend_from_slice(name.as_bytes());
            data.extend_from_slice(&offset.to_le_bytes());
            data.extend_from_slice(&size.to_le_bytes());
        }
        data
    }

    fn entry(name: &str, offset: u32, size: u32) -> ArchiveEntry {
        ArchiveEntry {
            name: name.to_owned(),
            offset,
            size,
            patched: false,
        }
    }

    #[test]
    fn test_parse_v2() {
        let data = build_sarc_v2(&[("a.txt", b"hello"), ("dir/b.bin", b"\x01\x02")]);
        let archive = StreamArchive::parse(&data).unwrap();

        assert_eq!(archive.version(), 2);
        assert_eq!(archive.entries().len(), 2);

        let b = archive.find("dir/b.bin").unwrap();
        assert_eq!(archive.entry_data(b, &data).unwrap(), b"\x01\x02");
    }

    #[test]
    fn test_parse_v3() {
        let data = build_sarc_v3(&[("x/one.ee", b"11"), ("x/two.bl", b"2222")]);
        let archive = StreamArchive::parse(&data).unwrap();

        assert_eq!(archive.version(), 3);
        let names: Vec<_> = archive.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["x/one.ee", "x/two.bl"]);

        let two = archive.find("x/two.bl").unwrap();
        assert_eq!(archive.entry_data(two, &data).unwrap(), b"2222");
    }

    #[test]
    fn test_unsupported_version() {
        let mut data = build_sarc_v2(&[]);
        data[8..12].copy_from_slice(&7u32.to_le_bytes());

        assert!(matches!(
            StreamArchive::parse(&data),
            Err(Error::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_truncated_directory() {
        let data = build_sarc_v2(&[("a.txt", b"hello")]);
        assert!(StreamArchive::parse(&data[..HEADER_SIZE + 4]).is_err());
    }

    #[test]
    fn test_overlay_merge() {
        let mut archive = StreamArchive {
            version: 2,
            entries: vec![entry("a", 0, 10)],
        };

        let toc = build_toc(&[("a", 0, 12), ("b", 10, 5)]);
        let stats = archive.apply_overlay(&toc).unwrap();

        assert_eq!(stats, OverlayStats { added: 1, patched: 1 });
        assert_eq!(archive.entries().len(), 2);
        assert_eq!(archive.find("a").unwrap().size, 12);

        let b = archive.find("b").unwrap();
        assert!(b.patched);
        assert_eq!((b.offset, b.size), (10, 5));
    }

    #[test]
    fn test_overlay_unchanged_entry_not_counted() {
        let mut archive = StreamArchive {
            version: 2,
            entries: vec![entry("a", 16, 4)],
        };

        let stats = archive.apply_overlay(&build_toc(&[("a", 16, 4)])).unwrap();
        assert_eq!(stats, OverlayStats::default());
    }

    #[test]
    fn test_malformed_overlay_leaves_archive_untouched() {
        let mut archive = StreamArchive {
            version: 2,
            entries: vec![entry("a", 16, 4)],
        };

        let mut toc = build_toc(&[("a", 32, 8), ("b", 40, 1)]);
        toc.truncate(toc.len() - 2);

        assert!(archive.apply_overlay(&toc).is_err());
        assert_eq!(archive.entries(), &[entry("a", 16, 4)]);
    }

    #[test]
    fn test_external_entry() {
        let archive = StreamArchive {
            version: 2,
            entries: vec![entry("patched.bin", 0, 4)],
        };
        let e = archive.find("patched.bin").unwrap();

        assert!(e.is_external());
        assert!(matches!(
            archive.entry_data(e, &[0; 64]),
            Err(Error::EntryNotFound(_))
        ));
    }
}
