//! Generic byte compressor used by the optimizer.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

pub trait Compressor: Send + Sync {
    /// Name advertised in the compressed wrapper's `algorithm` field.
    fn algorithm(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;
}

/// zlib-framed DEFLATE.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    level: Compression,
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self {
            level: Compression::best(),
        }
    }
}

impl Compressor for ZlibCompressor {
    fn algorithm(&self) -> &'static str {
        "zlib"
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut enc = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        enc.write_all(data)?;
        enc.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    #[test]
    fn test_zlib_shrinks_repetitive_input() {
        let data = "sensor-reading,".repeat(200);
        let compressed = ZlibCompressor::default().compress(data.as_bytes()).unwrap();
        assert!(compressed.len() < data.len() / 4);

        let mut out = String::new();
        ZlibDecoder::new(compressed.as_slice()).read_to_string(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
