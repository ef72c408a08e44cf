//! Archive entry decompression.

use crate::table::entry_blocks;
use crate::{Codec, CompressionBlock, Error, Result, TableEntry};

/// Decompress the stored bytes of `entry`.
///
/// `data` is exactly the `[offset, offset + size)` range of the data volume
/// and `blocks` is the block table of the archive the entry came from.
/// Uncompressed entries are copied through unchanged.
pub fn decompress_entry(
    codec: &dyn Codec,
    entry: &TableEntry,
    blocks: &[CompressionBlock],
    data: &[u8],
) -> Result<Vec<u8>> {
    if data.len() != entry.size as usize {
        return Err(Error::SizeMismatch {
            expected: entry.size as u64,
            actual: data.len() as u64,
        });
    }

    let expected = entry.uncompressed_size as usize;
    let mut output = Vec::with_capacity(expected);

    let run = entry_blocks(entry, blocks)?;
    if run.is_empty() {
        codec.decompress(entry.library, data, expected, &mut output)?;
        return Ok(output);
    }

    let mut scratch = Vec::new();
    let mut cursor = 0usize;

    for block in run {
        let compressed = block.compressed_size as usize;
        let chunk = data
            .get(cursor..cursor + compressed)
            .ok_or(Error::SizeMismatch {
                expected: (cursor + compressed) as u64,
                actual: data.len() as u64,
            })?;

        // The last block may cover more than what is left of the entry.
        let wanted = (block.uncompressed_size as usize).min(expected - output.len());

        if block.compressed_size == block.uncompressed_size {
            output.extend_from_slice(&chunk[..wanted]);
        } else {
            codec.decompress(
                entry.library,
                chunk,
                block.uncompressed_size as usize,
                &mut scratch,
            )?;
            output.extend_from_slice(&scratch[..wanted]);
        }

        cursor += compressed;
    }

    tracing::trace!(
        hash = %entry.name_hash,
        blocks = run.len(),
        size = output.len(),
        "decompressed multi-block entry"
    );

    if output.len() != expected {
        return Err(Error::SizeMismatch {
            expected: expected as u64,
            actual: output.len() as u64,
        });
    }

    Ok(output)
}
