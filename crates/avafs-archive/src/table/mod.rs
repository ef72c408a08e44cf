//! Archive table (`.tab`) parsing.
//!
//! A table indexes one data volume (`.arc`). Entries are keyed by the name
//! hash of the resource and point at `[offset, offset + size)` in the volume.
//!
//! Two layouts exist and a game only ever uses one of them:
//!
//! - [`TableLayout::Legacy`]: 12-byte header, flat 12-byte entries, no
//!   compression metadata.
//! - [`TableLayout::Current`]: 24-byte header, a compression block table and
//!   20-byte entries carrying the uncompressed size and codec.
//!
//! Both are normalized into [`TableEntry`]; a legacy entry becomes an
//! uncompressed entry whose `uncompressed_size` equals its `size`.

mod header;

pub use header::{
    BlockRecord, CurrentEntryRecord, CurrentHeader, LegacyEntryRecord, LegacyHeader, TAB_MAGIC,
};

use avafs_common::{BinaryReader, NameHash};

use crate::{Error, Result};

/// Which on-disk table layout to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableLayout {
    /// Flat entries without compression metadata.
    Legacy,
    /// Entries with compression metadata and a shared block table.
    #[default]
    Current,
}

/// Compression library used by a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLibrary {
    /// Stored as-is.
    None,
    /// zlib.
    Zlib,
    /// Oodle (proprietary, needs an external codec).
    Oodle,
    /// Any other library id. Only fails once the entry is decompressed.
    Unknown(u8),
}

impl CompressionLibrary {
    /// The library id as stored in the table.
    pub fn id(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Zlib => 1,
            Self::Oodle => 4,
            Self::Unknown(id) => id,
        }
    }
}

impl From<u8> for CompressionLibrary {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Zlib,
            4 => Self::Oodle,
            other => Self::Unknown(other),
        }
    }
}

/// One chunk of a multi-block compressed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionBlock {
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

/// A normalized table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    /// Hash of the resource name.
    pub name_hash: NameHash,
    /// Byte offset in the data volume.
    pub offset: u32,
    /// Size in the data volume.
    pub size: u32,
    /// Size once decompressed.
    pub uncompressed_size: u32,
    /// First compression block, 0 for single-block entries.
    pub block_index: u16,
    /// Compression library.
    pub library: CompressionLibrary,
    /// Raw entry flags.
    pub flags: u8,
}

impl TableEntry {
    /// Whether the stored bytes need decompressing.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.library != CompressionLibrary::None
    }

    fn from_legacy(record: &LegacyEntryRecord) -> Self {
        Self {
            name_hash: NameHash(record.name_hash),
            offset: record.offset,
            size: record.size,
            uncompressed_size: record.size,
            block_index: 0,
            library: CompressionLibrary::None,
            flags: 0,
        }
    }

    fn from_current(record: &CurrentEntryRecord) -> Self {
        Self {
            name_hash: NameHash(record.name_hash),
            offset: record.offset,
            size: record.size,
            uncompressed_size: record.uncompressed_size,
            block_index: record.block_index,
            library: CompressionLibrary::from(record.library),
            flags: record.flags,
        }
    }
}

/// A parsed archive table.
#[derive(Debug, Clone, Default)]
pub struct ArchiveTable {
    entries: Vec<TableEntry>,
    blocks: Vec<CompressionBlock>,
}

impl ArchiveTable {
    /// Parse table bytes using the given layout.
    pub fn parse(data: &[u8], layout: TableLayout) -> Result<Self> {
        match layout {
            TableLayout::Legacy => Self::parse_legacy(data),
            TableLayout::Current => Self::parse_current(data),
        }
    }

    fn parse_legacy(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);
        let header: LegacyHeader = reader.read_struct()?;
        check_magic(header.magic)?;

        let record_size = std::mem::size_of::<LegacyEntryRecord>();
        let mut entries = Vec::with_capacity(reader.remaining() / record_size);

        // A trailing partial record is padding, not an entry.
        while reader.remaining() >= record_size {
            let record: LegacyEntryRecord = reader.read_struct()?;
            entries.push(TableEntry::from_legacy(&record));
        }

        Ok(Self {
            entries,
            blocks: Vec::new(),
        })
    }

    fn parse_current(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);
        let header: CurrentHeader = reader.read_struct()?;
        check_magic(header.magic)?;

        let block_count = reader.read_u32()? as usize;
        let mut blocks = Vec::with_capacity(block_count.min(reader.remaining() / 8));
        for _ in 0..block_count {
            let record: BlockRecord = reader.read_struct()?;
            blocks.push(CompressionBlock {
                compressed_size: record.compressed_size,
                uncompressed_size: record.uncompressed_size,
            });
        }

        let record_size = std::mem::size_of::<CurrentEntryRecord>();
        let mut entries = Vec::with_capacity(reader.remaining() / record_size);
        while reader.remaining() >= record_size {
            let record: CurrentEntryRecord = reader.read_struct()?;
            entries.push(TableEntry::from_current(&record));
        }

        Ok(Self { entries, blocks })
    }

    /// All entries in table order.
    #[inline]
    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    /// The shared compression block table.
    #[inline]
    pub fn blocks(&self) -> &[CompressionBlock] {
        &self.blocks
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the first entry with the given name hash.
    pub fn find(&self, name_hash: NameHash) -> Option<&TableEntry> {
        self.entries.iter().find(|e| e.name_hash == name_hash)
    }

    /// Number of bytes the entry occupies in the data volume, derived from
    /// the block table.
    pub fn required_buffer_size(&self, entry: &TableEntry) -> Result<u64> {
        required_buffer_size(entry, &self.blocks)
    }
}

fn check_magic(magic: u32) -> Result<()> {
    if magic != TAB_MAGIC {
        return Err(Error::InvalidSignature {
            expected: TAB_MAGIC,
            actual: magic,
        });
    }
    Ok(())
}

/// The run of blocks that make up `entry`.
///
/// Single-block entries (`block_index == 0`) and uncompressed entries return
/// an empty slice.
pub fn entry_blocks<'a>(
    entry: &TableEntry,
    blocks: &'a [CompressionBlock],
) -> Result<&'a [CompressionBlock]> {
    if !entry.is_compressed() || entry.block_index == 0 {
        return Ok(&[]);
    }

    let start = entry.block_index as usize;
    let mut covered = 0u64;
    let mut end = start;

    while covered < entry.uncompressed_size as u64 {
        let block = blocks.get(end).ok_or(Error::BlockOutOfRange {
            index: end,
            count: blocks.len(),
        })?;
        if block.uncompressed_size == 0 {
            return Err(Error::EmptyBlock(end));
        }
        covered += block.uncompressed_size as u64;
        end += 1;
    }

    Ok(&blocks[start..end])
}

/// Number of bytes `entry` occupies in the data volume.
pub fn required_buffer_size(entry: &TableEntry, blocks: &[CompressionBlock]) -> Result<u64> {
    let run = entry_blocks(entry, blocks)?;
    if run.is_empty() {
        return Ok(entry.size as u64);
    }
    Ok(run.iter().map(|b| b.compressed_size as u64).sum())
}
