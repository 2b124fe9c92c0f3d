//! # Coordinate algebra
//!
//! Maps between logical cell coordinates, tile ids and intra-tile positions.
//!
//! Coordinate tuples travel through the engine as raw little-endian 8-byte
//! words (`i64` or `f64` per the schema), exactly as they are submitted and
//! stored; comparisons and grid arithmetic dispatch on the coordinate
//! datatype. Merge keys are order-preserving big-endian byte strings, so the
//! read coordinator can compare cells from any fragment with a plain
//! lexicographic byte compare.

pub mod hilbert;

use crate::schema::{ArraySchema, ArrayType, Layout, bits_for};
use gridstore_core::{Datatype, Result, bail_corrupt, bail_invalid};
use std::cmp::Ordering;

/// Byte width of one coordinate word.
pub const COORD_WORD: usize = 8;

pub(crate) fn decode_i64(word: &[u8]) -> i64 {
	i64::from_le_bytes(word[..COORD_WORD].try_into().expect("coordinate word is 8 bytes"))
}

pub(crate) fn decode_f64(word: &[u8]) -> f64 {
	f64::from_le_bytes(word[..COORD_WORD].try_into().expect("coordinate word is 8 bytes"))
}

pub(crate) fn encode_i64(value: i64) -> [u8; COORD_WORD] {
	value.to_le_bytes()
}

pub(crate) fn encode_f64(value: f64) -> [u8; COORD_WORD] {
	value.to_le_bytes()
}

/// Compares two coordinate words of the given datatype.
pub(crate) fn cmp_word(a: &[u8], b: &[u8], datatype: Datatype) -> Ordering {
	match datatype {
		Datatype::Float64 => decode_f64(a).total_cmp(&decode_f64(b)),
		_ => decode_i64(a).cmp(&decode_i64(b)),
	}
}

/// Re-encodes a coordinate word so that lexicographic byte order equals the
/// value order: sign-flipped big-endian for integers, the total-order trick
/// for floats.
pub(crate) fn orderable_word(word: &[u8], datatype: Datatype) -> [u8; COORD_WORD] {
	match datatype {
		Datatype::Float64 => {
			let bits = decode_f64(word).to_bits();
			let flipped = if bits & (1 << 63) != 0 { !bits } else { bits | (1 << 63) };
			flipped.to_be_bytes()
		}
		_ => ((decode_i64(word) as u64) ^ (1 << 63)).to_be_bytes(),
	}
}

/// A caller-supplied query region: one closed `[lo, hi]` range per dimension.
#[derive(Clone, Debug, PartialEq)]
pub enum Subarray {
	Int(Vec<[i64; 2]>),
	Float(Vec<[f64; 2]>),
}

impl Subarray {
	pub fn int(ranges: Vec<[i64; 2]>) -> Self {
		Subarray::Int(ranges)
	}

	pub fn float(ranges: Vec<[f64; 2]>) -> Self {
		Subarray::Float(ranges)
	}

	#[must_use]
	pub fn rank(&self) -> usize {
		match self {
			Subarray::Int(ranges) => ranges.len(),
			Subarray::Float(ranges) => ranges.len(),
		}
	}

	/// Validates the subarray against a schema and clips it to the domain.
	///
	/// Returns `Ok(None)` for an explicitly empty subarray (some `lo > hi`),
	/// which reads treat as an empty stream. A subarray that lies fully
	/// outside the domain is an error.
	pub(crate) fn clip_to_schema(&self, schema: &ArraySchema) -> Result<Option<CoordBox>> {
		if self.rank() as u32 != schema.rank() {
			bail_invalid!("subarray has {} ranges, the array has {} dimensions", self.rank(), schema.rank());
		}
		match (self, schema.coords_type()) {
			(Subarray::Int(ranges), Datatype::Int64) => {
				if ranges.iter().any(|[lo, hi]| lo > hi) {
					return Ok(None);
				}
				let mut clipped = Vec::with_capacity(ranges.len());
				for (range, dimension) in ranges.iter().zip(&schema.dimensions) {
					let crate::schema::DimensionDomain::Int { domain, .. } = dimension.domain else {
						bail_invalid!("dimension '{}' is not integer-typed", dimension.name);
					};
					let lo = range[0].max(domain[0]);
					let hi = range[1].min(domain[1]);
					if lo > hi {
						bail_invalid!(
							"subarray range [{}, {}] lies outside the domain of dimension '{}'",
							range[0],
							range[1],
							dimension.name
						);
					}
					clipped.push([lo, hi]);
				}
				Ok(Some(CoordBox::from_int(&clipped)))
			}
			(Subarray::Float(ranges), Datatype::Float64) => {
				if ranges.iter().any(|[lo, hi]| lo > hi) {
					return Ok(None);
				}
				let mut clipped = Vec::with_capacity(ranges.len());
				for (range, dimension) in ranges.iter().zip(&schema.dimensions) {
					let crate::schema::DimensionDomain::Float { domain, .. } = dimension.domain else {
						bail_invalid!("dimension '{}' is not float-typed", dimension.name);
					};
					let lo = range[0].max(domain[0]);
					let hi = range[1].min(domain[1]);
					if lo > hi {
						bail_invalid!(
							"subarray range [{}, {}] lies outside the domain of dimension '{}'",
							range[0],
							range[1],
							dimension.name
						);
					}
					clipped.push([lo, hi]);
				}
				Ok(Some(CoordBox::from_float(&clipped)))
			}
			_ => bail_invalid!("subarray coordinate type does not match the array's dimensions"),
		}
	}
}

/// A coordinate-tuple box stored as raw words: `[lo₀ hi₀ lo₁ hi₁ …]`.
///
/// The same layout serves subarrays, sparse tile MBRs and fragment non-empty
/// domains, so book-keeping writes these bytes verbatim.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CoordBox {
	pub datatype: Datatype,
	pairs: Vec<u8>,
}

impl CoordBox {
	pub fn from_int(ranges: &[[i64; 2]]) -> Self {
		let mut pairs = Vec::with_capacity(ranges.len() * 2 * COORD_WORD);
		for [lo, hi] in ranges {
			pairs.extend_from_slice(&encode_i64(*lo));
			pairs.extend_from_slice(&encode_i64(*hi));
		}
		Self {
			datatype: Datatype::Int64,
			pairs,
		}
	}

	pub fn from_float(ranges: &[[f64; 2]]) -> Self {
		let mut pairs = Vec::with_capacity(ranges.len() * 2 * COORD_WORD);
		for [lo, hi] in ranges {
			pairs.extend_from_slice(&encode_f64(*lo));
			pairs.extend_from_slice(&encode_f64(*hi));
		}
		Self {
			datatype: Datatype::Float64,
			pairs,
		}
	}

	pub fn from_pairs(datatype: Datatype, pairs: Vec<u8>) -> Result<Self> {
		if pairs.len() % (2 * COORD_WORD) != 0 {
			bail_corrupt!("coordinate box of {} bytes is not a whole number of ranges", pairs.len());
		}
		Ok(Self { datatype, pairs })
	}

	/// A degenerate box spanning a single coordinate tuple.
	pub fn from_tuple(datatype: Datatype, tuple: &[u8]) -> Self {
		let mut pairs = Vec::with_capacity(tuple.len() * 2);
		for word in tuple.chunks_exact(COORD_WORD) {
			pairs.extend_from_slice(word);
			pairs.extend_from_slice(word);
		}
		Self { datatype, pairs }
	}

	#[must_use]
	pub fn rank(&self) -> usize {
		self.pairs.len() / (2 * COORD_WORD)
	}

	pub fn pairs(&self) -> &[u8] {
		&self.pairs
	}

	pub fn lo_word(&self, dim: usize) -> &[u8] {
		&self.pairs[dim * 2 * COORD_WORD..dim * 2 * COORD_WORD + COORD_WORD]
	}

	pub fn hi_word(&self, dim: usize) -> &[u8] {
		&self.pairs[dim * 2 * COORD_WORD + COORD_WORD..(dim + 1) * 2 * COORD_WORD]
	}

	/// Whether a coordinate tuple lies inside the box, inclusive.
	pub fn contains(&self, coords: &[u8]) -> bool {
		for dim in 0..self.rank() {
			let word = &coords[dim * COORD_WORD..(dim + 1) * COORD_WORD];
			if cmp_word(word, self.lo_word(dim), self.datatype) == Ordering::Less
				|| cmp_word(word, self.hi_word(dim), self.datatype) == Ordering::Greater
			{
				return false;
			}
		}
		true
	}

	pub fn intersects(&self, other: &CoordBox) -> bool {
		for dim in 0..self.rank() {
			if cmp_word(self.lo_word(dim), other.hi_word(dim), self.datatype) == Ordering::Greater
				|| cmp_word(self.hi_word(dim), other.lo_word(dim), self.datatype) == Ordering::Less
			{
				return false;
			}
		}
		true
	}

	/// Grows this box to cover another.
	pub fn expand(&mut self, other: &CoordBox) {
		for dim in 0..self.rank() {
			if cmp_word(other.lo_word(dim), self.lo_word(dim), self.datatype) == Ordering::Less {
				let word: Vec<u8> = other.lo_word(dim).to_vec();
				let start = dim * 2 * COORD_WORD;
				self.pairs[start..start + COORD_WORD].copy_from_slice(&word);
			}
			if cmp_word(other.hi_word(dim), self.hi_word(dim), self.datatype) == Ordering::Greater {
				let word: Vec<u8> = other.hi_word(dim).to_vec();
				let start = dim * 2 * COORD_WORD + COORD_WORD;
				self.pairs[start..start + COORD_WORD].copy_from_slice(&word);
			}
		}
	}

	/// Grows this box to cover one coordinate tuple.
	pub fn expand_tuple(&mut self, coords: &[u8]) {
		let tuple_box = CoordBox::from_tuple(self.datatype, coords);
		self.expand(&tuple_box);
	}

	pub fn to_int_ranges(&self) -> Result<Vec<[i64; 2]>> {
		if self.datatype != Datatype::Int64 {
			bail_invalid!("coordinate box is not integer-typed");
		}
		Ok((0..self.rank())
			.map(|dim| [decode_i64(self.lo_word(dim)), decode_i64(self.hi_word(dim))])
			.collect())
	}

	pub fn to_subarray(&self) -> Subarray {
		match self.datatype {
			Datatype::Float64 => Subarray::Float(
				(0..self.rank())
					.map(|dim| [decode_f64(self.lo_word(dim)), decode_f64(self.hi_word(dim))])
					.collect(),
			),
			_ => Subarray::Int(
				(0..self.rank())
					.map(|dim| [decode_i64(self.lo_word(dim)), decode_i64(self.hi_word(dim))])
					.collect(),
			),
		}
	}
}

/// Builds the global merge key of a sparse cell: an order-preserving byte
/// string under the array's cell order, with a lexicographic coordinate
/// tie-break.
#[derive(Debug)]
pub(crate) struct CellKeyMaker {
	datatype: Datatype,
	rank: usize,
	order: Layout,
	/// Domain origin and per-dimension bits for the hilbert order.
	hilbert: Option<(Vec<i64>, u32)>,
}

impl CellKeyMaker {
	pub fn new(schema: &ArraySchema) -> Result<Self> {
		let rank = schema.rank() as usize;
		let hilbert = if schema.cell_order == Layout::Hilbert {
			let dims = schema.int_dimensions()?;
			let bits = dims
				.iter()
				.map(|([lo, hi], _)| bits_for((hi - lo + 1) as u64))
				.max()
				.unwrap_or(1);
			Some((dims.iter().map(|([lo, _], _)| *lo).collect(), bits))
		} else {
			None
		};
		Ok(Self {
			datatype: schema.coords_type(),
			rank,
			order: schema.cell_order,
			hilbert,
		})
	}

	pub fn key(&self, coords: &[u8]) -> Vec<u8> {
		let word = |dim: usize| &coords[dim * COORD_WORD..(dim + 1) * COORD_WORD];
		match self.order {
			Layout::RowMajor => {
				let mut key = Vec::with_capacity(self.rank * COORD_WORD);
				for dim in 0..self.rank {
					key.extend_from_slice(&orderable_word(word(dim), self.datatype));
				}
				key
			}
			Layout::ColMajor => {
				let mut key = Vec::with_capacity(self.rank * COORD_WORD);
				for dim in (0..self.rank).rev() {
					key.extend_from_slice(&orderable_word(word(dim), self.datatype));
				}
				key
			}
			Layout::Hilbert => {
				let (origin, bits) = self.hilbert.as_ref().expect("hilbert state exists for hilbert order");
				let offsets: Vec<u64> = (0..self.rank)
					.map(|dim| (decode_i64(word(dim)) - origin[dim]) as u64)
					.collect();
				let index = hilbert::hilbert_index(&offsets, *bits);
				let mut key = Vec::with_capacity((self.rank + 1) * COORD_WORD);
				key.extend_from_slice(&index.to_be_bytes());
				for dim in 0..self.rank {
					key.extend_from_slice(&orderable_word(word(dim), self.datatype));
				}
				key
			}
		}
	}
}

/// Odometer over the integer cells of a box, in row- or column-major order.
pub(crate) struct BoxIter {
	lo: Vec<i64>,
	hi: Vec<i64>,
	current: Vec<i64>,
	order: Layout,
	done: bool,
}

impl BoxIter {
	pub fn new(lo: Vec<i64>, hi: Vec<i64>, order: Layout) -> Self {
		debug_assert!(matches!(order, Layout::RowMajor | Layout::ColMajor));
		let done = lo.iter().zip(&hi).any(|(l, h)| l > h);
		Self {
			current: lo.clone(),
			lo,
			hi,
			order,
			done,
		}
	}
}

impl Iterator for BoxIter {
	type Item = Vec<i64>;

	fn next(&mut self) -> Option<Vec<i64>> {
		if self.done {
			return None;
		}
		let out = self.current.clone();
		let rank = self.lo.len();
		let dims: Vec<usize> = match self.order {
			Layout::ColMajor => (0..rank).collect(),
			_ => (0..rank).rev().collect(),
		};
		let mut advanced = false;
		for dim in dims {
			self.current[dim] += 1;
			if self.current[dim] <= self.hi[dim] {
				advanced = true;
				break;
			}
			self.current[dim] = self.lo[dim];
		}
		if !advanced {
			self.done = true;
		}
		Some(out)
	}
}

/// The tile grid of a dense array: global tile ids, intra-tile positions and
/// region enumeration under the schema's tile and cell order.
#[derive(Debug)]
pub(crate) struct DenseGrid {
	pub lo: Vec<i64>,
	pub hi: Vec<i64>,
	pub extents: Vec<i64>,
	pub tiles_per_dim: Vec<i64>,
	pub cell_order: Layout,
	pub tile_order: Layout,
	cell_bits: u32,
	tile_bits: u32,
}

impl DenseGrid {
	pub fn new(schema: &ArraySchema) -> Result<Self> {
		if schema.array_type != ArrayType::Dense {
			bail_invalid!("only dense arrays have a tile grid");
		}
		let dims = schema.int_dimensions()?;
		let lo: Vec<i64> = dims.iter().map(|([lo, _], _)| *lo).collect();
		let hi: Vec<i64> = dims.iter().map(|([_, hi], _)| *hi).collect();
		let extents: Vec<i64> = dims.iter().map(|(_, extent)| *extent).collect();
		let tiles_per_dim: Vec<i64> = dims.iter().map(|([lo, hi], extent)| (hi - lo + 1) / extent).collect();
		let cell_bits = extents.iter().map(|e| bits_for(*e as u64)).max().unwrap_or(1);
		let tile_bits = tiles_per_dim.iter().map(|n| bits_for(*n as u64)).max().unwrap_or(1);
		Ok(Self {
			lo,
			hi,
			extents,
			tiles_per_dim,
			cell_order: schema.cell_order,
			tile_order: schema.tile_order,
			cell_bits,
			tile_bits,
		})
	}

	#[must_use]
	pub fn rank(&self) -> usize {
		self.lo.len()
	}

	#[must_use]
	pub fn tile_volume(&self) -> u64 {
		self.extents.iter().map(|e| *e as u64).product()
	}

	pub fn contains_cell(&self, cell: &[i64]) -> bool {
		cell
			.iter()
			.zip(self.lo.iter().zip(&self.hi))
			.all(|(c, (lo, hi))| c >= lo && c <= hi)
	}

	/// The grid coordinates of the tile holding a cell.
	pub fn tile_coords_of(&self, cell: &[i64]) -> Vec<i64> {
		cell
			.iter()
			.zip(self.lo.iter().zip(&self.extents))
			.map(|(c, (lo, extent))| (c - lo) / extent)
			.collect()
	}

	/// The global tile id under the schema's tile order.
	pub fn tile_id(&self, tile_coords: &[i64]) -> u64 {
		match self.tile_order {
			Layout::RowMajor => {
				let mut id: u64 = 0;
				for dim in 0..self.rank() {
					id = id * self.tiles_per_dim[dim] as u64 + tile_coords[dim] as u64;
				}
				id
			}
			Layout::ColMajor => {
				let mut id: u64 = 0;
				for dim in (0..self.rank()).rev() {
					id = id * self.tiles_per_dim[dim] as u64 + tile_coords[dim] as u64;
				}
				id
			}
			Layout::Hilbert => {
				let offsets: Vec<u64> = tile_coords.iter().map(|t| *t as u64).collect();
				hilbert::hilbert_index(&offsets, self.tile_bits)
			}
		}
	}

	/// The lowest cell coordinate of a tile.
	pub fn tile_lo(&self, tile_coords: &[i64]) -> Vec<i64> {
		tile_coords
			.iter()
			.zip(self.lo.iter().zip(&self.extents))
			.map(|(t, (lo, extent))| lo + t * extent)
			.collect()
	}

	/// The highest cell coordinate of a tile.
	pub fn tile_hi(&self, tile_coords: &[i64]) -> Vec<i64> {
		self
			.tile_lo(tile_coords)
			.iter()
			.zip(&self.extents)
			.map(|(lo, extent)| lo + extent - 1)
			.collect()
	}

	/// The merge position of a cell within its tile: the stride position for
	/// row/column order, the raw hilbert index for hilbert order. Both are
	/// strictly increasing along the storage order of the tile.
	pub fn cell_pos(&self, cell: &[i64], tile_lo: &[i64]) -> u64 {
		match self.cell_order {
			Layout::RowMajor => {
				let mut pos: u64 = 0;
				for dim in 0..self.rank() {
					pos = pos * self.extents[dim] as u64 + (cell[dim] - tile_lo[dim]) as u64;
				}
				pos
			}
			Layout::ColMajor => {
				let mut pos: u64 = 0;
				for dim in (0..self.rank()).rev() {
					pos = pos * self.extents[dim] as u64 + (cell[dim] - tile_lo[dim]) as u64;
				}
				pos
			}
			Layout::Hilbert => {
				let offsets: Vec<u64> = cell.iter().zip(tile_lo).map(|(c, lo)| (c - lo) as u64).collect();
				hilbert::hilbert_index(&offsets, self.cell_bits)
			}
		}
	}

	/// Whether a region starts and ends on tile boundaries.
	pub fn region_is_tile_aligned(&self, region_lo: &[i64], region_hi: &[i64]) -> bool {
		for dim in 0..self.rank() {
			let extent = self.extents[dim];
			if (region_lo[dim] - self.lo[dim]) % extent != 0 || (region_hi[dim] - self.lo[dim] + 1) % extent != 0 {
				return false;
			}
		}
		true
	}

	/// Cell count of a region.
	pub fn region_volume(region_lo: &[i64], region_hi: &[i64]) -> u64 {
		region_lo
			.iter()
			.zip(region_hi)
			.map(|(lo, hi)| (hi - lo + 1).max(0) as u64)
			.product()
	}

	/// The tiles overlapping a region, in tile order.
	pub fn region_tiles(&self, region_lo: &[i64], region_hi: &[i64]) -> Vec<Vec<i64>> {
		let tile_lo: Vec<i64> = self.tile_coords_of(region_lo);
		let tile_hi: Vec<i64> = self.tile_coords_of(region_hi);
		let mut tiles: Vec<Vec<i64>> = BoxIter::new(tile_lo, tile_hi, Layout::RowMajor).collect();
		tiles.sort_by_key(|tile_coords| self.tile_id(tile_coords));
		tiles
	}

	/// The cells of one tile that fall inside a clip box, in storage order,
	/// each with its storage index within the full tile and its merge
	/// position.
	pub fn cells_in_tile_clipped(
		&self,
		tile_coords: &[i64],
		clip_lo: &[i64],
		clip_hi: &[i64],
	) -> Vec<(Vec<i64>, u64, u64)> {
		let tile_lo = self.tile_lo(tile_coords);
		let tile_hi = self.tile_hi(tile_coords);
		let lo: Vec<i64> = tile_lo.iter().zip(clip_lo).map(|(a, b)| *a.max(b)).collect();
		let hi: Vec<i64> = tile_hi.iter().zip(clip_hi).map(|(a, b)| *a.min(b)).collect();
		if lo.iter().zip(&hi).any(|(l, h)| l > h) {
			return Vec::new();
		}

		match self.cell_order {
			Layout::RowMajor | Layout::ColMajor => BoxIter::new(lo, hi, self.cell_order)
				.map(|cell| {
					let pos = self.cell_pos(&cell, &tile_lo);
					(cell, pos, pos)
				})
				.collect(),
			Layout::Hilbert => {
				// Storage order is the hilbert sort of the whole tile; the
				// storage index is the rank within that sort.
				let mut cells: Vec<(u64, Vec<i64>)> = BoxIter::new(tile_lo.clone(), tile_hi, Layout::RowMajor)
					.map(|cell| (self.cell_pos(&cell, &tile_lo), cell))
					.collect();
				cells.sort_by_key(|(index, _)| *index);
				cells
					.into_iter()
					.enumerate()
					.filter(|(_, (_, cell))| cell.iter().zip(lo.iter().zip(&hi)).all(|(c, (l, h))| c >= l && c <= h))
					.map(|(rank, (index, cell))| (cell, rank as u64, index))
					.collect()
			}
		}
	}
}
