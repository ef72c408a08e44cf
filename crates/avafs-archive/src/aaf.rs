//! Compressed archive envelope (`AAF`).
//!
//! Stream archives shipped inside data volumes are usually wrapped in an AAF
//! container: a fixed header followed by a run of chunks, each holding raw
//! DEFLATE data. The decompressed chunks concatenated form the inner `SARC`.

use std::io::Read;

use flate2::read::DeflateDecoder;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use avafs_common::BinaryReader;

use crate::{Error, Result};

/// Leading magic of an AAF container, "AAF\0" read as a little-endian u32.
pub const AAF_MAGIC: u32 = 0x0046_4141;

/// Secondary magic stored after the version.
pub const AAF_MAGIC2: &[u8; 28] = b"AVALANCHEARCHIVEFORMATISCOOL";

/// Magic trailing each chunk header ("EWAM").
pub const CHUNK_MAGIC: u32 = 0x4D41_5745;

/// Only known container version.
pub const AAF_VERSION: u32 = 1;

/// AAF container header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct AafHeader {
    pub magic: u32,
    pub version: u32,
    pub magic2: [u8; 28],
    pub total_uncompressed_size: u32,
    pub uncompressed_buffer_size: u32,
    pub chunk_count: u32,
}

/// Per-chunk header, followed by `compressed_size` bytes of raw DEFLATE.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct ChunkHeader {
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    /// Distance from this chunk header to the next one.
    pub data_size: u32,
    pub magic: u32,
}

/// Whether `data` starts with the AAF magic.
pub fn is_aaf(data: &[u8]) -> bool {
    BinaryReader::new(data).peek_u32().ok() == Some(AAF_MAGIC)
}

/// Decompress an AAF container into the archive it wraps.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut reader = BinaryReader::new(data);
    let header: AafHeader = reader.read_struct()?;

    if header.magic != AAF_MAGIC {
        return Err(Error::InvalidSignature {
            expected: AAF_MAGIC,
            actual: header.magic,
        });
    }
    if header.version != AAF_VERSION {
        return Err(Error::UnsupportedVersion(header.version));
    }

    let total = header.total_uncompressed_size as usize;
    let chunk_count = header.chunk_count;
    let buffer_size = header.uncompressed_buffer_size;

    tracing::debug!(
        chunks = chunk_count,
        total_uncompressed = total,
        buffer_size,
        "decompressing AAF container"
    );

    let mut output = Vec::with_capacity(total);

    for index in 0..chunk_count {
        let chunk_start = reader.position();
        let chunk: ChunkHeader = reader.read_struct()?;

        if chunk.magic != CHUNK_MAGIC {
            return Err(Error::InvalidSignature {
                expected: CHUNK_MAGIC,
                actual: chunk.magic,
            });
        }

        let compressed_size = chunk.compressed_size as usize;
        let uncompressed_size = chunk.uncompressed_size as usize;
        let data_size = chunk.data_size as usize;

        // The next chunk must start past this one's compressed data.
        if data_size < std::mem::size_of::<ChunkHeader>() + compressed_size {
            return Err(Error::Decompression(format!(
                "chunk {index}: data size {data_size} does not cover {compressed_size} compressed bytes"
            )));
        }
        if output.len() + uncompressed_size > total {
            return Err(Error::SizeMismatch {
                expected: total as u64,
                actual: (output.len() + uncompressed_size) as u64,
            });
        }

        let compressed = reader.read_bytes(compressed_size)?;
        let before = output.len();

        DeflateDecoder::new(compressed)
            .take(uncompressed_size as u64 + 1)
            .read_to_end(&mut output)
            .map_err(|e| Error::Decompression(format!("chunk {index}: {e}")))?;

        let produced = output.len() - before;
        if produced != uncompressed_size {
            return Err(Error::SizeMismatch {
                expected: uncompressed_size as u64,
                actual: produced as u64,
            });
        }

        tracing::trace!(
            chunk = index,
            compressed = compressed_size,
            uncompressed = uncompressed_size,
            "decompressed AAF chunk"
        );

        reader.seek(chunk_start + data_size);
    }

    if output.len() != total {
        return Err(Error::SizeMismatch {
            expected: total as u64,
            actual: output.len() as u64,
        });
    }

    Ok(output)
}
