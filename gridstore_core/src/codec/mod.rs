//! # Tile codec
//!
//! Tiles are the unit of compression and I/O. Every tile on disk is framed as
//!
//! ```text
//! [compressed_len u64][uncompressed_len u64][codec_id u8][payload…]
//! ```
//!
//! all little-endian. `codec_id == 0` stores the payload verbatim. The codec
//! set is closed and versioned by the schema format; adding a codec bumps the
//! schema version.

mod method_blosc;
mod method_gzip;
mod method_lz4;
mod method_rle;
mod method_zstd;

pub use method_blosc::{shuffle_bytes, unshuffle_bytes};
pub use method_gzip::{compress_gzip, decompress_gzip};

use crate::io::{ValueReader, ValueReaderSlice, ValueWriter, ValueWriterBlob};
use crate::{Blob, Result, bail_corrupt, bail_invalid};
use method_blosc::{compress_blosc, decompress_blosc};
use method_lz4::{compress_lz4, decompress_lz4};
use method_rle::{compress_rle, decompress_rle};
use method_zstd::{compress_zstd, decompress_zstd};

/// Size of the frame header preceding every tile payload.
pub const TILE_FRAME_HEADER_SIZE: u64 = 17;

/// The compression codec of an attribute, fixed at schema creation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
	/// Payload stored verbatim.
	None,
	/// Deflate; levels 1-9.
	Gzip { level: i32 },
	/// Zstandard; levels 1-22.
	Zstd { level: i32 },
	Lz4,
	/// Byte-shuffle by element width, then an inner codec. The inner codec id
	/// is carried in the payload so readers never need the schema to decode.
	Blosc,
	/// Run-length encoding over whole cell values.
	Rle,
}

impl Compression {
	/// The on-disk codec identifier.
	#[must_use]
	pub fn id(&self) -> u8 {
		match self {
			Compression::None => 0,
			Compression::Gzip { .. } => 1,
			Compression::Zstd { .. } => 2,
			Compression::Lz4 => 3,
			Compression::Blosc => 4,
			Compression::Rle => 5,
		}
	}

	/// The compression level stored next to the codec id; zero when the codec
	/// has no level.
	#[must_use]
	pub fn level(&self) -> i32 {
		match self {
			Compression::Gzip { level } | Compression::Zstd { level } => *level,
			_ => 0,
		}
	}

	/// Reassembles a codec from its on-disk `(id, level)` pair.
	pub fn from_parts(id: u8, level: i32) -> Result<Compression> {
		Ok(match id {
			0 => Compression::None,
			1 => Compression::Gzip { level },
			2 => Compression::Zstd { level },
			3 => Compression::Lz4,
			4 => Compression::Blosc,
			5 => Compression::Rle,
			_ => bail_corrupt!("unknown codec id {id}"),
		})
	}

	/// Validates the compression level range at schema creation.
	pub fn validate(&self) -> Result<()> {
		match self {
			Compression::Gzip { level } if !(1..=9).contains(level) => {
				bail_invalid!("gzip level {level} outside 1..=9")
			}
			Compression::Zstd { level } if !(1..=22).contains(level) => {
				bail_invalid!("zstd level {level} outside 1..=22")
			}
			_ => Ok(()),
		}
	}
}

/// Compresses a tile payload without framing.
///
/// `elem_size` is the byte width of one cell value; it drives the blosc
/// shuffle and the RLE run unit and is ignored by the byte-stream codecs.
pub fn compress(blob: &Blob, compression: &Compression, elem_size: usize) -> Result<Blob> {
	match compression {
		Compression::None => Ok(blob.clone()),
		Compression::Gzip { level } => compress_gzip(blob, *level),
		Compression::Zstd { level } => compress_zstd(blob, *level),
		Compression::Lz4 => compress_lz4(blob),
		Compression::Blosc => compress_blosc(blob, elem_size),
		Compression::Rle => compress_rle(blob, elem_size),
	}
}

/// Decompresses a tile payload without framing, dispatching on the codec id
/// read from the frame.
pub fn decompress(blob: &Blob, codec_id: u8, uncompressed_len: u64, elem_size: usize) -> Result<Blob> {
	let out = match codec_id {
		0 => blob.clone(),
		1 => decompress_gzip(blob)?,
		2 => decompress_zstd(blob)?,
		3 => decompress_lz4(blob, uncompressed_len as usize)?,
		4 => decompress_blosc(blob, elem_size, uncompressed_len)?,
		5 => decompress_rle(blob, elem_size, uncompressed_len)?,
		_ => bail_corrupt!("unknown codec id {codec_id}"),
	};
	if out.len() != uncompressed_len {
		bail_corrupt!(
			"tile decompressed to {} bytes, frame header promised {uncompressed_len}",
			out.len()
		);
	}
	Ok(out)
}

/// Compresses and frames one tile: header plus payload, ready to append to an
/// attribute file.
pub fn frame_tile(blob: &Blob, compression: &Compression, elem_size: usize) -> Result<Blob> {
	let payload = compress(blob, compression, elem_size)?;
	let mut writer = ValueWriterBlob::new_le();
	writer.write_u64(payload.len())?;
	writer.write_u64(blob.len())?;
	writer.write_u8(compression.id())?;
	writer.write_blob(&payload)?;
	Ok(writer.into_blob())
}

/// Reverses [`frame_tile`]: checks the header against the actual byte count
/// and returns the decompressed payload.
pub fn unframe_tile(framed: &Blob, elem_size: usize) -> Result<Blob> {
	let mut reader = ValueReaderSlice::new_le(framed.as_slice());
	if reader.len() < TILE_FRAME_HEADER_SIZE {
		bail_corrupt!("framed tile of {} bytes is shorter than the frame header", reader.len());
	}
	let compressed_len = reader.read_u64()?;
	let uncompressed_len = reader.read_u64()?;
	let codec_id = reader.read_u8()?;
	if compressed_len != reader.remaining() {
		bail_corrupt!(
			"frame header promises {compressed_len} payload bytes, {} present",
			reader.remaining()
		);
	}
	let payload = reader.read_blob(compressed_len)?;
	decompress(&payload, codec_id, uncompressed_len, elem_size)
}

#[cfg(test)]
pub(crate) fn generate_test_data(size: usize) -> Blob {
	// Mildly repetitive bytes so every codec has something to chew on.
	let mut data = Vec::with_capacity(size);
	for i in 0..size {
		data.push((i % 251) as u8 ^ ((i / 7) % 13) as u8);
	}
	Blob::from(data)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case::none(Compression::None)]
	#[case::gzip(Compression::Gzip { level: 6 })]
	#[case::zstd(Compression::Zstd { level: 3 })]
	#[case::lz4(Compression::Lz4)]
	#[case::blosc(Compression::Blosc)]
	#[case::rle(Compression::Rle)]
	fn test_frame_round_trip(#[case] compression: Compression) -> Result<()> {
		let data = generate_test_data(64 * 1024);
		let framed = frame_tile(&data, &compression, 4)?;
		let restored = unframe_tile(&framed, 4)?;
		assert_eq!(restored, data, "{compression:?} must restore tiles byte-for-byte");
		Ok(())
	}

	#[test]
	fn test_none_codec_stores_verbatim() -> Result<()> {
		let data = generate_test_data(100);
		let framed = frame_tile(&data, &Compression::None, 1)?;
		assert_eq!(framed.len(), TILE_FRAME_HEADER_SIZE + data.len());
		assert_eq!(&framed.as_slice()[TILE_FRAME_HEADER_SIZE as usize..], data.as_slice());
		Ok(())
	}

	#[test]
	fn test_parts_round_trip() -> Result<()> {
		for compression in [
			Compression::None,
			Compression::Gzip { level: 9 },
			Compression::Zstd { level: 22 },
			Compression::Lz4,
			Compression::Blosc,
			Compression::Rle,
		] {
			let restored = Compression::from_parts(compression.id(), compression.level())?;
			assert_eq!(restored, compression);
		}
		assert!(Compression::from_parts(99, 0).is_err());
		Ok(())
	}

	#[test]
	fn test_level_validation() {
		assert!(Compression::Gzip { level: 0 }.validate().is_err());
		assert!(Compression::Gzip { level: 9 }.validate().is_ok());
		assert!(Compression::Zstd { level: 23 }.validate().is_err());
		assert!(Compression::Zstd { level: 1 }.validate().is_ok());
		assert!(Compression::Lz4.validate().is_ok());
	}

	#[test]
	fn test_truncated_frame_is_corruption() {
		let data = generate_test_data(100);
		let framed = frame_tile(&data, &Compression::Gzip { level: 6 }, 1).unwrap();
		let truncated = Blob::from(&framed.as_slice()[..framed.len() as usize - 5]);
		assert!(unframe_tile(&truncated, 1).is_err());
	}

	#[test]
	fn test_mismatched_payload_length_is_corruption() {
		// A header that promises more payload bytes than are present.
		let mut writer = ValueWriterBlob::new_le();
		writer.write_u64(10).unwrap();
		writer.write_u64(10).unwrap();
		writer.write_u8(0).unwrap();
		writer.write_slice(&[1, 2, 3]).unwrap();
		assert!(unframe_tile(&writer.into_blob(), 1).is_err());
	}
}
