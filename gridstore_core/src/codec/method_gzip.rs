//! Gzip (deflate) compression, levels 1-9.

use crate::{Blob, Error, Result};
use flate2::Compression as GzipLevel;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

/// Compresses data using gzip at the given level (1-9).
pub fn compress_gzip(blob: &Blob, level: i32) -> Result<Blob> {
	let mut encoder = GzEncoder::new(Vec::new(), GzipLevel::new(level as u32));
	encoder
		.write_all(blob.as_slice())
		.and_then(|()| encoder.finish())
		.map(Blob::from)
		.map_err(|e| Error::Corruption(format!("gzip compression failed: {e}")))
}

/// Decompresses gzip data.
pub fn decompress_gzip(blob: &Blob) -> Result<Blob> {
	let mut decoder = MultiGzDecoder::new(blob.as_slice());
	let mut out = Vec::new();
	decoder
		.read_to_end(&mut out)
		.map_err(|e| Error::Corruption(format!("gzip decompression failed: {e}")))?;
	Ok(Blob::from(out))
}

#[cfg(test)]
mod tests {
	use super::super::generate_test_data;
	use super::*;

	#[test]
	fn test_round_trip() -> Result<()> {
		let data = generate_test_data(100_000);
		let compressed = compress_gzip(&data, 6)?;
		assert!(compressed.len() < data.len());
		assert_eq!(decompress_gzip(&compressed)?, data);
		Ok(())
	}

	#[test]
	fn test_levels_trade_size() -> Result<()> {
		let data = generate_test_data(100_000);
		let fast = compress_gzip(&data, 1)?;
		let best = compress_gzip(&data, 9)?;
		assert!(best.len() <= fast.len());
		assert_eq!(decompress_gzip(&fast)?, data);
		assert_eq!(decompress_gzip(&best)?, data);
		Ok(())
	}

	#[test]
	fn test_garbage_input_fails() {
		let garbage = Blob::from(&[0x00u8, 0x01, 0x02, 0x03]);
		assert!(decompress_gzip(&garbage).is_err());
	}
}
