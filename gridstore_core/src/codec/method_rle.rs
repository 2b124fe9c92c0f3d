//! Run-length encoding over whole cell values.
//!
//! The payload is a sequence of `[run_len u32][value elem_size bytes]`
//! records. Runs never exceed `u32::MAX` repetitions.

use crate::{Blob, Result, bail_corrupt, bail_invalid};

pub fn compress_rle(blob: &Blob, elem_size: usize) -> Result<Blob> {
	if elem_size == 0 {
		bail_invalid!("rle element size must not be zero");
	}
	if blob.len() as usize % elem_size != 0 {
		bail_invalid!(
			"rle input of {} bytes is not a multiple of the {elem_size} byte element size",
			blob.len()
		);
	}

	let mut out = Vec::new();
	let mut chunks = blob.as_slice().chunks_exact(elem_size);
	let Some(first) = chunks.next() else {
		return Ok(Blob::new_empty());
	};

	let mut current = first;
	let mut run: u32 = 1;
	for chunk in chunks {
		if chunk == current && run < u32::MAX {
			run += 1;
		} else {
			out.extend_from_slice(&run.to_le_bytes());
			out.extend_from_slice(current);
			current = chunk;
			run = 1;
		}
	}
	out.extend_from_slice(&run.to_le_bytes());
	out.extend_from_slice(current);
	Ok(Blob::from(out))
}

pub fn decompress_rle(blob: &Blob, elem_size: usize, uncompressed_len: u64) -> Result<Blob> {
	if elem_size == 0 {
		bail_corrupt!("rle element size must not be zero");
	}
	let record_size = 4 + elem_size;
	let bytes = blob.as_slice();
	if bytes.len() % record_size != 0 {
		bail_corrupt!("rle payload of {} bytes is not a whole number of runs", bytes.len());
	}

	let mut out = Vec::with_capacity(uncompressed_len as usize);
	for record in bytes.chunks_exact(record_size) {
		let run = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
		let value = &record[4..];
		for _ in 0..run {
			out.extend_from_slice(value);
		}
		if out.len() as u64 > uncompressed_len {
			bail_corrupt!("rle runs expand past the promised {uncompressed_len} bytes");
		}
	}
	Ok(Blob::from(out))
}
