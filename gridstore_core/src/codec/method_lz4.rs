//! LZ4 block compression.

use crate::{Blob, Error, Result};

/// Compresses data as a single LZ4 block.
pub fn compress_lz4(blob: &Blob) -> Result<Blob> {
	Ok(Blob::from(lz4_flex::block::compress(blob.as_slice())))
}

/// Decompresses a single LZ4 block. The frame header supplies the exact
/// uncompressed length.
pub fn decompress_lz4(blob: &Blob, uncompressed_len: usize) -> Result<Blob> {
	lz4_flex::block::decompress(blob.as_slice(), uncompressed_len)
		.map(Blob::from)
		.map_err(|e| Error::Corruption(format!("lz4 decompression failed: {e}")))
}
