//! Fragment book-keeping: the sole authoritative index into a fragment.
//!
//! One binary record, gzip-compressed as a whole, listing in tile order the
//! tile start offsets of every data file, the sparse tile MBRs, the per-tile
//! bounding coordinates, the cell counts and the fragment's non-empty
//! domain. Offsets are bit-exact file positions (checked on read against the
//! actual file sizes by the fragment reader).

use crate::coords::{COORD_WORD, CoordBox};
use crate::schema::ArraySchema;
use gridstore_core::codec::{compress_gzip, decompress_gzip};
use gridstore_core::io::{ValueReader, ValueReaderSlice, ValueWriter, ValueWriterBlob};
use gridstore_core::{Blob, Datatype, Result, bail_corrupt};

/// Magic of the serialized book-keeping record, `b"GSBK"`.
const BOOK_KEEPING_MAGIC: u32 = 0x4b42_5347;
const BOOK_KEEPING_VERSION: u32 = 1;

/// The decoded book-keeping record of one fragment.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FragmentMeta {
	pub sparse: bool,
	pub coords_type: Datatype,
	/// Dense: the tile-aligned write region. Sparse: the bounding box of all
	/// written coordinates.
	pub non_empty_domain: CoordBox,
	/// Tile start offsets per data file, files in schema order.
	pub tile_offsets: Vec<Vec<u64>>,
	/// Minimum bounding boxes of sparse tiles; empty for dense fragments.
	pub mbrs: Vec<CoordBox>,
	/// First and last cell coordinate of each tile, in cell order.
	pub bounds: Vec<(Vec<u8>, Vec<u8>)>,
	pub cell_counts: Vec<u64>,
}

impl FragmentMeta {
	#[must_use]
	pub fn tile_count(&self) -> u64 {
		self.cell_counts.len() as u64
	}

	#[must_use]
	pub fn total_cells(&self) -> u64 {
		self.cell_counts.iter().sum()
	}

	pub fn rank(&self) -> usize {
		self.non_empty_domain.rank()
	}

	/// Serializes and gzip-compresses the record.
	pub fn to_blob(&self) -> Result<Blob> {
		let mut writer = ValueWriterBlob::new_le();
		writer.write_u32(BOOK_KEEPING_MAGIC)?;
		writer.write_u32(BOOK_KEEPING_VERSION)?;
		writer.write_u32(self.rank() as u32)?;
		writer.write_u8(self.coords_type.to_u8())?;
		writer.write_u32(self.tile_offsets.len() as u32)?;
		writer.write_slice(self.non_empty_domain.pairs())?;

		let tiles = self.tile_count();
		writer.write_u64(tiles)?;
		for offsets in &self.tile_offsets {
			if offsets.len() as u64 != tiles {
				bail_corrupt!("offsets table has {} entries for {tiles} tiles", offsets.len());
			}
			for offset in offsets {
				writer.write_u64(*offset)?;
			}
		}
		if self.sparse {
			for mbr in &self.mbrs {
				writer.write_slice(mbr.pairs())?;
			}
		}
		for (first, last) in &self.bounds {
			writer.write_slice(first)?;
			writer.write_slice(last)?;
		}
		for count in &self.cell_counts {
			writer.write_u64(*count)?;
		}
		writer.write_u8(u8::from(self.sparse))?;

		compress_gzip(&writer.into_blob(), 6)
	}

	/// Decompresses and parses a record, validating it against the schema.
	pub fn from_blob(blob: &Blob, schema: &ArraySchema) -> Result<FragmentMeta> {
		let raw = decompress_gzip(blob)?;
		let mut reader = ValueReaderSlice::new_le(raw.as_slice());

		let magic = reader.read_u32()?;
		if magic != BOOK_KEEPING_MAGIC {
			bail_corrupt!("book-keeping magic {magic:#010x} does not match {BOOK_KEEPING_MAGIC:#010x}");
		}
		let version = reader.read_u32()?;
		if version != BOOK_KEEPING_VERSION {
			bail_corrupt!("book-keeping version {version} is not readable by this engine");
		}

		let rank = reader.read_u32()? as usize;
		if rank != schema.rank() as usize {
			bail_corrupt!("book-keeping rank {rank} does not match the schema rank {}", schema.rank());
		}
		let coords_type = Datatype::from_u8(reader.read_u8()?)?;
		if coords_type != schema.coords_type() {
			bail_corrupt!("book-keeping coordinate type {coords_type} does not match the schema");
		}
		let file_count = reader.read_u32()? as usize;
		let expected_files = super::data_files(schema).len();
		if file_count != expected_files {
			bail_corrupt!("book-keeping lists {file_count} data files, the schema defines {expected_files}");
		}

		let pair_bytes = 2 * rank * COORD_WORD;
		let non_empty_domain = CoordBox::from_pairs(coords_type, reader.read_blob(pair_bytes as u64)?.into_vec())?;

		let tiles = reader.read_u64()? as usize;
		let mut tile_offsets = Vec::with_capacity(file_count);
		for _ in 0..file_count {
			let mut offsets = Vec::with_capacity(tiles);
			for _ in 0..tiles {
				offsets.push(reader.read_u64()?);
			}
			tile_offsets.push(offsets);
		}

		let sparse_expected = schema.is_sparse();
		let mut mbrs = Vec::new();
		if sparse_expected {
			mbrs.reserve(tiles);
			for _ in 0..tiles {
				mbrs.push(CoordBox::from_pairs(coords_type, reader.read_blob(pair_bytes as u64)?.into_vec())?);
			}
		}

		let tuple_bytes = (rank * COORD_WORD) as u64;
		let mut bounds = Vec::with_capacity(tiles);
		for _ in 0..tiles {
			let first = reader.read_blob(tuple_bytes)?.into_vec();
			let last = reader.read_blob(tuple_bytes)?.into_vec();
			bounds.push((first, last));
		}

		let mut cell_counts = Vec::with_capacity(tiles);
		for _ in 0..tiles {
			cell_counts.push(reader.read_u64()?);
		}

		let sparse = reader.read_u8()? != 0;
		if sparse != sparse_expected {
			bail_corrupt!("book-keeping sparse flag does not match the schema array type");
		}
		if reader.has_remaining() {
			bail_corrupt!("book-keeping record has {} trailing bytes", reader.remaining());
		}

		Ok(FragmentMeta {
			sparse,
			coords_type,
			non_empty_domain,
			tile_offsets,
			mbrs,
			bounds,
			cell_counts,
		})
	}
}
