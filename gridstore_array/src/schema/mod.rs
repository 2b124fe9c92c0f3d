//! # Array schema
//!
//! The immutable definition of an array: dimensions, attributes, cell and
//! tile order, sparse capacity and codecs. Created once, persisted as a
//! single binary file (`__array_schema.tdb`) inside the array directory and
//! cached per context after the first load.

mod attribute;
mod dimension;

pub use attribute::*;
pub use dimension::*;

use gridstore_core::codec::Compression;
use gridstore_core::io::{ValueReader, ValueReaderSlice, ValueWriter, ValueWriterBlob};
use gridstore_core::{Blob, Datatype, Result, bail_corrupt, bail_invalid};
use itertools::Itertools;

/// Magic of the serialized schema, `b"GSAS"`.
const SCHEMA_MAGIC: u32 = 0x5341_5347;
/// Current schema format version. Bumped when the codec set changes.
const SCHEMA_VERSION: u32 = 1;

/// Reserved name of the coordinate attribute of sparse arrays.
pub const COORDS_NAME: &str = "__coords";

/// Whether cells live on a fixed tile grid or carry their own coordinates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArrayType {
	Dense,
	Sparse,
}

/// A cell or tile traversal order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Layout {
	RowMajor,
	ColMajor,
	Hilbert,
}

impl Layout {
	fn to_u8(self) -> u8 {
		match self {
			Layout::RowMajor => 0,
			Layout::ColMajor => 1,
			Layout::Hilbert => 2,
		}
	}

	fn from_u8(value: u8) -> Result<Layout> {
		Ok(match value {
			0 => Layout::RowMajor,
			1 => Layout::ColMajor,
			2 => Layout::Hilbert,
			_ => bail_corrupt!("unknown layout id {value}"),
		})
	}
}

/// The immutable definition of an array.
#[derive(Clone, Debug, PartialEq)]
pub struct ArraySchema {
	pub array_type: ArrayType,
	pub dimensions: Vec<Dimension>,
	pub attributes: Vec<Attribute>,
	pub cell_order: Layout,
	pub tile_order: Layout,
	/// Maximum cells per sparse tile; ignored by dense arrays.
	pub capacity: u64,
	/// Codec of the coordinate attribute of sparse fragments.
	pub coords_compression: Compression,
}

impl ArraySchema {
	/// Creates and validates a schema.
	pub fn new(
		array_type: ArrayType,
		dimensions: Vec<Dimension>,
		attributes: Vec<Attribute>,
		cell_order: Layout,
		tile_order: Layout,
		capacity: u64,
	) -> Result<ArraySchema> {
		let schema = ArraySchema {
			array_type,
			dimensions,
			attributes,
			cell_order,
			tile_order,
			capacity,
			coords_compression: Compression::Gzip { level: 6 },
		};
		schema.validate()?;
		Ok(schema)
	}

	#[must_use]
	pub fn with_coords_compression(mut self, compression: Compression) -> Self {
		self.coords_compression = compression;
		self
	}

	#[must_use]
	pub fn rank(&self) -> u32 {
		self.dimensions.len() as u32
	}

	#[must_use]
	pub fn is_dense(&self) -> bool {
		self.array_type == ArrayType::Dense
	}

	#[must_use]
	pub fn is_sparse(&self) -> bool {
		self.array_type == ArrayType::Sparse
	}

	/// The shared coordinate datatype of all dimensions.
	#[must_use]
	pub fn coords_type(&self) -> Datatype {
		self
			.dimensions
			.first()
			.map_or(Datatype::Int64, |dimension| dimension.datatype())
	}

	/// Byte size of one coordinate tuple.
	#[must_use]
	pub fn coords_size(&self) -> u64 {
		u64::from(self.rank()) * 8
	}

	/// Looks up an attribute and its position in schema order.
	#[must_use]
	pub fn attribute(&self, name: &str) -> Option<(usize, &Attribute)> {
		self
			.attributes
			.iter()
			.enumerate()
			.find(|(_, attribute)| attribute.name == name)
	}

	/// The integer domain/extent pairs of a dense array.
	pub fn int_dimensions(&self) -> Result<Vec<([i64; 2], i64)>> {
		self
			.dimensions
			.iter()
			.map(|dimension| match dimension.domain {
				DimensionDomain::Int { domain, extent } => Ok((domain, extent)),
				DimensionDomain::Float { .. } => {
					bail_invalid!("dimension '{}' is not integer-typed", dimension.name)
				}
			})
			.collect()
	}

	/// Cells per dense tile.
	pub fn tile_volume(&self) -> Result<u64> {
		let mut volume: u64 = 1;
		for (_, extent) in self.int_dimensions()? {
			volume = volume.saturating_mul(extent as u64);
		}
		Ok(volume)
	}

	pub fn validate(&self) -> Result<()> {
		if self.dimensions.is_empty() {
			bail_invalid!("an array needs at least one dimension");
		}
		if self.attributes.is_empty() {
			bail_invalid!("an array needs at least one attribute");
		}

		let dense = self.is_dense();
		for dimension in &self.dimensions {
			dimension.validate(dense)?;
		}
		if !self.dimensions.iter().map(|d| d.datatype()).all_equal() {
			bail_invalid!("all dimensions must share one coordinate datatype");
		}
		if !self.dimensions.iter().map(|d| &d.name).all_unique() {
			bail_invalid!("dimension names must be unique");
		}

		for attribute in &self.attributes {
			attribute.validate()?;
		}
		if !self.attributes.iter().map(|a| &a.name).all_unique() {
			bail_invalid!("attribute names must be unique");
		}
		self.coords_compression.validate()?;

		if self.is_sparse() && self.capacity == 0 {
			bail_invalid!("sparse arrays need a positive tile capacity");
		}

		if self.cell_order == Layout::Hilbert || self.tile_order == Layout::Hilbert {
			self.validate_hilbert_feasibility()?;
		}
		Ok(())
	}

	/// A Hilbert order needs all per-dimension bit widths to fit one `u64`
	/// index.
	fn validate_hilbert_feasibility(&self) -> Result<()> {
		let rank = u64::from(self.rank());
		if self.coords_type() == Datatype::Float64 {
			bail_invalid!("hilbert order needs integer dimensions");
		}
		let dims = self.int_dimensions()?;

		if self.cell_order == Layout::Hilbert {
			let bits = if self.is_dense() {
				dims.iter().map(|(_, extent)| bits_for(*extent as u64)).max().unwrap_or(1)
			} else {
				dims
					.iter()
					.map(|([lo, hi], _)| bits_for((hi - lo + 1) as u64))
					.max()
					.unwrap_or(1)
			};
			if rank * u64::from(bits) > 64 {
				bail_invalid!("hilbert cell order needs {rank}x{bits} bits, more than a u64 index holds");
			}
		}
		if self.tile_order == Layout::Hilbert && self.is_dense() {
			let bits = dims
				.iter()
				.map(|([lo, hi], extent)| bits_for(((hi - lo + 1) / extent) as u64))
				.max()
				.unwrap_or(1);
			if rank * u64::from(bits) > 64 {
				bail_invalid!("hilbert tile order needs {rank}x{bits} bits, more than a u64 index holds");
			}
		}
		Ok(())
	}

	/// Serializes the schema to its on-disk form.
	pub fn to_blob(&self) -> Result<Blob> {
		let mut writer = ValueWriterBlob::new_le();
		writer.write_u32(SCHEMA_MAGIC)?;
		writer.write_u32(SCHEMA_VERSION)?;
		writer.write_u8(match self.array_type {
			ArrayType::Dense => 0,
			ArrayType::Sparse => 1,
		})?;
		writer.write_u32(self.rank())?;
		for dimension in &self.dimensions {
			writer.write_string(&dimension.name)?;
		}
		writer.write_u8(self.coords_type().to_u8())?;
		for dimension in &self.dimensions {
			match dimension.domain {
				DimensionDomain::Int { domain: [lo, hi], .. } => {
					writer.write_i64(lo)?;
					writer.write_i64(hi)?;
				}
				DimensionDomain::Float { domain: [lo, hi], .. } => {
					writer.write_f64(lo)?;
					writer.write_f64(hi)?;
				}
			}
		}
		for dimension in &self.dimensions {
			match dimension.domain {
				DimensionDomain::Int { extent, .. } => writer.write_i64(extent)?,
				DimensionDomain::Float { extent, .. } => writer.write_f64(extent)?,
			}
		}
		writer.write_u8(self.cell_order.to_u8())?;
		writer.write_u8(self.tile_order.to_u8())?;
		writer.write_u64(self.capacity)?;
		writer.write_u32(self.attributes.len() as u32)?;
		for attribute in &self.attributes {
			writer.write_string(&attribute.name)?;
			writer.write_u8(attribute.datatype.to_u8())?;
			writer.write_u32(attribute.cell_val_num)?;
			writer.write_u8(attribute.compression.id())?;
			writer.write_i32(attribute.compression.level())?;
		}
		writer.write_u8(self.coords_compression.id())?;
		writer.write_i32(self.coords_compression.level())?;
		Ok(writer.into_blob())
	}

	/// Parses a schema from its on-disk form.
	pub fn from_blob(blob: &Blob) -> Result<ArraySchema> {
		let mut reader = ValueReaderSlice::new_le(blob.as_slice());

		let magic = reader.read_u32()?;
		if magic != SCHEMA_MAGIC {
			bail_corrupt!("schema magic {magic:#010x} does not match {SCHEMA_MAGIC:#010x}");
		}
		let version = reader.read_u32()?;
		if version != SCHEMA_VERSION {
			bail_corrupt!("schema version {version} is not readable by this engine (expects {SCHEMA_VERSION})");
		}

		let array_type = match reader.read_u8()? {
			0 => ArrayType::Dense,
			1 => ArrayType::Sparse,
			other => bail_corrupt!("unknown array type id {other}"),
		};
		let rank = reader.read_u32()?;
		let mut names = Vec::with_capacity(rank as usize);
		for _ in 0..rank {
			names.push(reader.read_string()?);
		}
		let coords_type = Datatype::from_u8(reader.read_u8()?)?;

		let mut domains = Vec::with_capacity(rank as usize);
		for _ in 0..rank {
			match coords_type {
				Datatype::Int64 => domains.push((reader.read_i64()?, reader.read_i64()?, 0.0, 0.0)),
				Datatype::Float64 => domains.push((0, 0, reader.read_f64()?, reader.read_f64()?)),
				other => bail_corrupt!("coordinate datatype {other} is not valid"),
			}
		}
		let mut dimensions = Vec::with_capacity(rank as usize);
		for (name, (int_lo, int_hi, float_lo, float_hi)) in names.into_iter().zip(domains) {
			let domain = match coords_type {
				Datatype::Int64 => DimensionDomain::Int {
					domain: [int_lo, int_hi],
					extent: reader.read_i64()?,
				},
				_ => DimensionDomain::Float {
					domain: [float_lo, float_hi],
					extent: reader.read_f64()?,
				},
			};
			dimensions.push(Dimension { name, domain });
		}

		let cell_order = Layout::from_u8(reader.read_u8()?)?;
		let tile_order = Layout::from_u8(reader.read_u8()?)?;
		let capacity = reader.read_u64()?;

		let attr_count = reader.read_u32()?;
		let mut attributes = Vec::with_capacity(attr_count as usize);
		for _ in 0..attr_count {
			let name = reader.read_string()?;
			let datatype = Datatype::from_u8(reader.read_u8()?)?;
			let cell_val_num = reader.read_u32()?;
			let compression_id = reader.read_u8()?;
			let level = reader.read_i32()?;
			attributes.push(Attribute {
				name,
				datatype,
				cell_val_num,
				compression: Compression::from_parts(compression_id, level)?,
			});
		}
		let coords_compression = {
			let id = reader.read_u8()?;
			let level = reader.read_i32()?;
			Compression::from_parts(id, level)?
		};

		let schema = ArraySchema {
			array_type,
			dimensions,
			attributes,
			cell_order,
			tile_order,
			capacity,
			coords_compression,
		};
		schema.validate()?;
		Ok(schema)
	}
}

/// Bits needed to index `count` distinct values, at least one.
pub(crate) fn bits_for(count: u64) -> u32 {
	if count <= 1 { 1 } else { 64 - (count - 1).leading_zeros() }
}
