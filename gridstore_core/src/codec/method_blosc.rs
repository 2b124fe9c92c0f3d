//! Blosc-style compression: a byte shuffle over the element width followed by
//! an inner block codec. The payload records the inner codec id so a reader
//! can decode without consulting the schema:
//!
//! ```text
//! [inner_codec u8][elem_size u8][inner payload…]
//! ```

use super::method_gzip::decompress_gzip;
use super::method_lz4::{compress_lz4, decompress_lz4};
use super::method_zstd::decompress_zstd;
use crate::{Blob, Result, bail_corrupt, bail_invalid};

/// Inner codec used for freshly written tiles.
const DEFAULT_INNER_CODEC: u8 = 3; // lz4

/// Transposes `data` so that the n-th bytes of all elements become
/// contiguous, which greatly improves the compressibility of numeric runs.
#[must_use]
pub fn shuffle_bytes(data: &[u8], elem_size: usize) -> Vec<u8> {
	if elem_size <= 1 || data.len() % elem_size != 0 {
		return data.to_vec();
	}
	let count = data.len() / elem_size;
	let mut out = vec![0u8; data.len()];
	for (i, elem) in data.chunks_exact(elem_size).enumerate() {
		for (j, byte) in elem.iter().enumerate() {
			out[j * count + i] = *byte;
		}
	}
	out
}

/// Reverses [`shuffle_bytes`].
#[must_use]
pub fn unshuffle_bytes(data: &[u8], elem_size: usize) -> Vec<u8> {
	if elem_size <= 1 || data.len() % elem_size != 0 {
		return data.to_vec();
	}
	let count = data.len() / elem_size;
	let mut out = vec![0u8; data.len()];
	for i in 0..count {
		for j in 0..elem_size {
			out[i * elem_size + j] = data[j * count + i];
		}
	}
	out
}

pub fn compress_blosc(blob: &Blob, elem_size: usize) -> Result<Blob> {
	if elem_size == 0 || elem_size > u8::MAX as usize {
		bail_invalid!("blosc element size {elem_size} outside 1..=255");
	}
	let shuffled = shuffle_bytes(blob.as_slice(), elem_size);
	let inner = compress_lz4(&Blob::from(shuffled))?;
	let mut out = Vec::with_capacity(2 + inner.len() as usize);
	out.push(DEFAULT_INNER_CODEC);
	out.push(elem_size as u8);
	out.extend_from_slice(inner.as_slice());
	Ok(Blob::from(out))
}

pub fn decompress_blosc(blob: &Blob, elem_size: usize, uncompressed_len: u64) -> Result<Blob> {
	let bytes = blob.as_slice();
	if bytes.len() < 2 {
		bail_corrupt!("blosc payload of {} bytes is missing its header", bytes.len());
	}
	let inner_codec = bytes[0];
	let stored_elem_size = bytes[1] as usize;
	if stored_elem_size != elem_size {
		bail_corrupt!("blosc element size mismatch: payload says {stored_elem_size}, schema says {elem_size}");
	}
	let inner = Blob::from(&bytes[2..]);
	let shuffled = match inner_codec {
		1 => decompress_gzip(&inner)?,
		2 => decompress_zstd(&inner)?,
		// The shuffle preserves length, so the frame's uncompressed length is
		// also the lz4 block's output size.
		3 => decompress_lz4(&inner, uncompressed_len as usize)?,
		other => bail_corrupt!("unknown blosc inner codec id {other}"),
	};
	Ok(Blob::from(unshuffle_bytes(shuffled.as_slice(), elem_size)))
}

#[cfg(test)]
mod tests {
	use super::super::generate_test_data;
	use super::*;

	#[test]
	fn test_shuffle_round_trip() {
		let data: Vec<u8> = (0u8..24).collect();
		for elem_size in [1usize, 2, 3, 4, 8] {
			let shuffled = shuffle_bytes(&data, elem_size);
			assert_eq!(unshuffle_bytes(&shuffled, elem_size), data, "elem size {elem_size}");
		}
	}

	#[test]
	fn test_shuffle_groups_bytes_by_position() {
		// Two 4-byte elements: shuffling interleaves their byte columns.
		let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
		assert_eq!(shuffle_bytes(&data, 4), vec![1, 5, 2, 6, 3, 7, 4, 8]);
	}

	#[test]
	fn test_round_trip() -> Result<()> {
		let data = generate_test_data(64 * 1024);
		let compressed = compress_blosc(&data, 4)?;
		assert_eq!(decompress_blosc(&compressed, 4, data.len())?, data);
		Ok(())
	}

	#[test]
	fn test_elem_size_mismatch_is_corruption() -> Result<()> {
		let data = generate_test_data(1_024);
		let compressed = compress_blosc(&data, 4)?;
		assert!(decompress_blosc(&compressed, 8, data.len()).is_err());
		Ok(())
	}

	#[test]
	fn test_shuffled_numeric_data_compresses_better() -> Result<()> {
		// Slowly increasing u32 values: high bytes are constant, so the
		// shuffle should produce long runs.
		let values: Vec<u8> = (0u32..16_384).flat_map(|v| v.to_le_bytes()).collect();
		let blob = Blob::from(values);
		let blosc = compress_blosc(&blob, 4)?;
		let plain = compress_lz4(&blob)?;
		assert!(blosc.len() < plain.len());
		Ok(())
	}
}
