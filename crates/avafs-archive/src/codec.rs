//! Pluggable block decompression.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::{CompressionLibrary, Error, Result};

/// A decompressor for one or more [`CompressionLibrary`] values.
///
/// Oodle is proprietary and cannot be shipped, so callers that have access
/// to it can supply their own implementation of this trait.
pub trait Codec: Send + Sync {
    /// Decompress `input` into `output`.
    ///
    /// `output` is cleared first. Implementations must produce exactly
    /// `uncompressed_size` bytes or fail.
    fn decompress(
        &self,
        library: CompressionLibrary,
        input: &[u8],
        uncompressed_size: usize,
        output: &mut Vec<u8>,
    ) -> Result<()>;
}

/// Codec backed by `flate2`, handling uncompressed and zlib data.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodec;

impl Codec for DefaultCodec {
    fn decompress(
        &self,
        library: CompressionLibrary,
        input: &[u8],
        uncompressed_size: usize,
        output: &mut Vec<u8>,
    ) -> Result<()> {
        output.clear();

        match library {
            CompressionLibrary::None => output.extend_from_slice(input),
            CompressionLibrary::Zlib => {
                output.reserve(uncompressed_size);
                ZlibDecoder::new(input)
                    .read_to_end(output)
                    .map_err(|e| Error::Decompression(e.to_string()))?;
            }
            CompressionLibrary::Oodle | CompressionLibrary::Unknown(_) => {
                return Err(Error::UnsupportedCompression(library.id()));
            }
        }

        if output.len() != uncompressed_size {
            return Err(Error::SizeMismatch {
                expected: uncompressed_size as u64,
                actual: output.len() as u64,
            });
        }

        Ok(())
    }
}
