//! Payload compression codecs: zlib and Snappy.
//!
//! Snappy (block format) is what the agent emits; zlib is accepted inbound
//! because older controllers still use it. Pure byte-in/byte-out, no extra
//! framing.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::EnvelopeError;

/// Compress with zlib framing (DEFLATE inside a zlib wrapper).
pub fn compress_zlib(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| EnvelopeError::Compress(format!("zlib encode: {e}")))
}

/// Decompress a zlib-framed payload.
pub fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EnvelopeError::Compress(format!("zlib decode: {e}")))?;
    Ok(out)
}

/// Compress with the Snappy block format (not the framed stream).
pub fn compress_snappy(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    snap::raw::Encoder::new()
        .compress_vec(data)
        .map_err(|e| EnvelopeError::Compress(format!("snappy encode: {e}")))
}

/// Decompress a Snappy block payload.
pub fn decompress_snappy(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    snap::raw::Decoder::new()
        .decompress_vec(data)
        .map_err(|e| EnvelopeError::Compress(format!("snappy decode: {e}")))
}
