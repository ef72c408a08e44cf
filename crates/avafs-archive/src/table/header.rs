//! On-disk archive table records.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Magic shared by both table layouts ("TAB\0").
pub const TAB_MAGIC: u32 = 0x0042_4154;

/// Header of a current-layout table.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct CurrentHeader {
    pub magic: u32,
    pub version: u16,
    pub endian: u16,
    pub alignment: i32,
    pub unknown: u32,
    pub max_compressed_block_size: u32,
    pub uncompressed_block_size: u32,
}

/// Header of a legacy-layout table.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct LegacyHeader {
    pub magic: u32,
    pub version: u16,
    pub endian: u16,
    pub alignment: i32,
}

/// Current-layout entry record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct CurrentEntryRecord {
    pub name_hash: u32,
    pub offset: u32,
    pub size: u32,
    pub uncompressed_size: u32,
    pub block_index: u16,
    pub library: u8,
    pub flags: u8,
}

/// Legacy-layout entry record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct LegacyEntryRecord {
    pub name_hash: u32,
    pub offset: u32,
    pub size: u32,
}

/// Compression block record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct BlockRecord {
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}
