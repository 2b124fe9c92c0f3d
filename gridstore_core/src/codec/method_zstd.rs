//! Zstandard compression, levels 1-22.

use crate::{Blob, Error, Result};
use std::io::Cursor;

/// Compresses data using zstd at the given level (1-22).
pub fn compress_zstd(blob: &Blob, level: i32) -> Result<Blob> {
	zstd::encode_all(Cursor::new(blob.as_slice()), level)
		.map(Blob::from)
		.map_err(|e| Error::Corruption(format!("zstd compression failed: {e}")))
}

/// Decompresses zstd data.
pub fn decompress_zstd(blob: &Blob) -> Result<Blob> {
	zstd::decode_all(Cursor::new(blob.as_slice()))
		.map(Blob::from)
		.map_err(|e| Error::Corruption(format!("zstd decompression failed: {e}")))
}

#[cfg(test)]
mod tests {
	use super::super::generate_test_data;
	use super::*;

	#[test]
	fn test_round_trip() -> Result<()> {
		let data = generate_test_data(100_000);
		let compressed = compress_zstd(&data, 3)?;
		assert!(compressed.len() < data.len());
		assert_eq!(decompress_zstd(&compressed)?, data);
		Ok(())
	}

	#[test]
	fn test_garbage_input_fails() {
		let garbage = Blob::from(&[0xFFu8, 0xFE, 0xFD]);
		assert!(decompress_zstd(&garbage).is_err());
	}
}
