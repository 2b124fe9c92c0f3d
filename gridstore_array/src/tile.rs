//! Write-side tile buffers.
//!
//! A tile buffer accumulates the values of one attribute (or the coordinate
//! tuples) for the cells of one tile, in cell order. Fixed-cardinality
//! attributes produce a single payload per tile; variable-length attributes
//! produce two, an offsets stream and a values stream, framed and compressed
//! independently.

use crate::schema::Attribute;
use gridstore_core::io::{ValueReader, ValueReaderSlice, ValueWriter, ValueWriterBlob};
use gridstore_core::{Blob, Result, bail_corrupt};

/// Accumulates one tile of one attribute.
#[derive(Debug)]
pub(crate) enum TileBuffer {
	Fixed { data: Vec<u8>, cell_size: usize },
	Var { offsets: Vec<u64>, values: Vec<u8> },
}

impl TileBuffer {
	pub fn for_attribute(attribute: &Attribute) -> Self {
		match attribute.cell_size() {
			Some(cell_size) => TileBuffer::Fixed {
				data: Vec::new(),
				cell_size: cell_size as usize,
			},
			None => TileBuffer::Var {
				offsets: Vec::new(),
				values: Vec::new(),
			},
		}
	}

	/// A fixed-size buffer for raw coordinate tuples.
	pub fn for_coords(rank: usize) -> Self {
		TileBuffer::Fixed {
			data: Vec::new(),
			cell_size: rank * crate::coords::COORD_WORD,
		}
	}

	/// Appends one cell value.
	pub fn push(&mut self, value: &[u8]) {
		match self {
			TileBuffer::Fixed { data, cell_size } => {
				debug_assert_eq!(value.len(), *cell_size);
				data.extend_from_slice(value);
			}
			TileBuffer::Var { offsets, values } => {
				offsets.push(values.len() as u64);
				values.extend_from_slice(value);
			}
		}
	}

	#[must_use]
	pub fn cell_count(&self) -> u64 {
		match self {
			TileBuffer::Fixed { data, cell_size } => (data.len() / (*cell_size).max(1)) as u64,
			TileBuffer::Var { offsets, .. } => offsets.len() as u64,
		}
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.cell_count() == 0
	}

	/// Drains the buffer into its raw tile payloads, each paired with the
	/// element width its codec should use.
	pub fn take_payloads(&mut self) -> Result<Vec<(Blob, usize)>> {
		match self {
			TileBuffer::Fixed { data, cell_size } => {
				let payload = Blob::from(std::mem::take(data));
				Ok(vec![(payload, *cell_size)])
			}
			TileBuffer::Var { offsets, values } => {
				let mut writer = ValueWriterBlob::new_le();
				for offset in offsets.iter() {
					writer.write_u64(*offset)?;
				}
				offsets.clear();
				let offsets_payload = writer.into_blob();
				let values_payload = Blob::from(std::mem::take(values));
				Ok(vec![(offsets_payload, 8), (values_payload, 1)])
			}
		}
	}
}

/// Decodes the offsets stream of a variable-length tile.
pub(crate) fn offsets_from_blob(blob: &Blob) -> Result<Vec<u64>> {
	if blob.len() % 8 != 0 {
		bail_corrupt!("offsets tile of {} bytes is not a whole number of u64 entries", blob.len());
	}
	let mut reader = ValueReaderSlice::new_le(blob.as_slice());
	let mut offsets = Vec::with_capacity((blob.len() / 8) as usize);
	while reader.has_remaining() {
		offsets.push(reader.read_u64()?);
	}
	Ok(offsets)
}

/// The byte run of one cell within a decoded variable-length tile.
pub(crate) fn var_cell<'a>(offsets: &[u64], values: &'a Blob, index: usize) -> Result<&'a [u8]> {
	let start = offsets[index] as usize;
	let end = if index + 1 < offsets.len() {
		offsets[index + 1] as usize
	} else {
		values.len() as usize
	};
	if start > end || end > values.len() as usize {
		bail_corrupt!("offsets tile points outside its values tile ({start}..{end} of {})", values.len());
	}
	Ok(&values.as_slice()[start..end])
}
