use snap::raw::{max_compress_len, Decoder, Encoder};
use std::io::{Error, ErrorKind, Result};

/// Compression codec applied to block payloads.
///
/// The set is closed: the on-disk format records the codec as a single byte
/// and widening the set requires a format version bump.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompressorType {
    /// No compression, payloads are stored verbatim.
    Noop,
    /// Snappy compression, raw (block) format.
    Snappy,
}

impl From<CompressorType> for u8 {
    fn from(item: CompressorType) -> Self {
        match item {
            CompressorType::Noop => 0,
            CompressorType::Snappy => 1,
        }
    }
}

impl TryFrom<u8> for CompressorType {
    type Error = &'static str;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(CompressorType::Noop),
            1 => Ok(CompressorType::Snappy),
            _ => Err("Invalid value for CompressorType"),
        }
    }
}

impl CompressorType {
    /// Worst-case compressed size for an input of `input_len` bytes. Output
    /// buffers of this size never overflow in [`compress_into`](Self::compress_into).
    pub fn max_compressed_len(&self, input_len: usize) -> usize {
        match self {
            CompressorType::Noop => input_len,
            CompressorType::Snappy => max_compress_len(input_len),
        }
    }

    /// Compresses `input` into `output`, returning the compressed size.
    pub fn compress_into(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        match self {
            CompressorType::Noop => {
                output[..input.len()].copy_from_slice(input);
                Ok(input.len())
            }
            CompressorType::Snappy => Encoder::new()
                .compress(input, output)
                .map_err(|e| Error::new(ErrorKind::InvalidData, e)),
        }
    }

    /// Decompresses `input` into `output`, returning the inflated size.
    /// `output` must be sized to the recorded inflated length.
    pub fn decompress_into(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        match self {
            CompressorType::Noop => {
                output[..input.len()].copy_from_slice(input);
                Ok(input.len())
            }
            CompressorType::Snappy => Decoder::new()
                .decompress(input, output)
                .map_err(|e| Error::new(ErrorKind::InvalidData, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(compressor: CompressorType, data: &[u8]) {
        let mut compressed = vec![0; compressor.max_compressed_len(data.len())];
        let compressed_size = compressor
            .compress_into(data, &mut compressed)
            .expect("Compression failed");

        let mut inflated = vec![0; data.len()];
        let inflated_size = compressor
            .decompress_into(&compressed[..compressed_size], &mut inflated)
            .expect("Decompression failed");

        assert_eq!(inflated_size, data.len());
        assert_eq!(inflated, data);
    }

    #[test]
    fn test_noop_round_trip() {
        round_trip(CompressorType::Noop, b"the quick brown wallaby");
    }

    #[test]
    fn test_snappy_round_trip() {
        round_trip(CompressorType::Snappy, b"the quick brown wallaby");
    }

    #[test]
    fn test_snappy_shrinks_repetitive_input() {
        let compressor = CompressorType::Snappy;
        let data = vec![b'x'; 8192];
        let mut compressed = vec![0; compressor.max_compressed_len(data.len())];
        let compressed_size = compressor
            .compress_into(&data, &mut compressed)
            .expect("Compression failed");
        assert!(compressed_size < data.len());
    }

    #[test]
    fn test_snappy_rejects_garbage() {
        let compressor = CompressorType::Snappy;
        let mut inflated = vec![0; 64];
        assert!(compressor
            .decompress_into(&[0xFF, 0xFF, 0xFF, 0xFF], &mut inflated)
            .is_err());
    }

    #[test]
    fn test_codec_byte_round_trip() {
        for compressor in [CompressorType::Noop, CompressorType::Snappy] {
            let byte: u8 = compressor.into();
            assert_eq!(CompressorType::try_from(byte), Ok(compressor));
        }
        assert!(CompressorType::try_from(7).is_err());
    }
}
