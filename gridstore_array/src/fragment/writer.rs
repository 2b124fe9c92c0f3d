//! # Fragment writer
//!
//! Accumulates submitted cells into per-attribute tile buffers, compresses
//! full tiles and appends them to the fragment's data files, and commits the
//! book-keeping plus the visibility sentinel at finalize.
//!
//! Modes:
//! - *dense-ordered* — cells arrive in the global cell order of the write
//!   region (tile order across tiles, cell order within a tile); the writer
//!   cuts tiles off the stream.
//! - *dense-unordered* — cells arrive with coordinates in any order; the
//!   writer sorts them into global order and requires the region to be
//!   covered exactly once.
//! - *sparse-unordered* — cells arrive with coordinates in any order; the
//!   writer sorts them into cell order and packs capacity-sized tiles.
//!
//! A filesystem error aborts the write; nothing is retried. The fragment
//! only becomes visible when the sentinel lands, so an abandoned writer
//! leaves an invisible directory for a later cleanup pass.

use crate::coords::{COORD_WORD, CellKeyMaker, CoordBox, DenseGrid, Subarray, decode_i64, encode_i64};
use crate::fragment::{self, BOOK_KEEPING_FILE, DataFile, OK_FILE, meta::FragmentMeta};
use crate::schema::{ArraySchema, Attribute};
use crate::sort::{CellRecord, CellSorter};
use crate::tile::TileBuffer;
use gridstore_core::codec::{Compression, frame_tile};
use gridstore_core::vfs::{Vfs, uri};
use gridstore_core::{Blob, Config, ConcurrencyLimits, Result, bail_invalid, ensure_arg, join_bounded, run_compute};
use itertools::Itertools;
use std::sync::Arc;

/// How submitted cells relate to the array's cell order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteMode {
	DenseOrdered,
	DenseUnordered,
	SparseUnordered,
}

/// One attribute's submitted cells: raw values, plus the per-cell byte
/// starts for variable-length attributes.
#[derive(Clone, Copy, Debug)]
pub struct WriteBuffer<'a> {
	pub data: &'a [u8],
	pub offsets: Option<&'a [u64]>,
}

#[derive(Debug)]
struct FileState {
	path: String,
	spec: DataFile,
	offsets: Vec<u64>,
	size: u64,
}

/// A writer handle for one fragment; dropped before [`finalize`] it leaves
/// no visible trace.
///
/// [`finalize`]: FragmentWriter::finalize
#[derive(Debug)]
pub struct FragmentWriter {
	vfs: Vfs,
	schema: Arc<ArraySchema>,
	limits: ConcurrencyLimits,
	mode: WriteMode,
	fragment_uri: String,
	/// Submit slot to schema attribute index.
	attr_order: Vec<usize>,
	files: Vec<FileState>,
	/// Per attribute in schema order, plus the coordinate buffer of sparse
	/// fragments at the end.
	buffers: Vec<TileBuffer>,
	grid: Option<DenseGrid>,
	region: Option<(Vec<i64>, Vec<i64>)>,
	region_tiles: Vec<Vec<i64>>,
	tile_volume: u64,
	capacity: u64,
	sorter: Option<CellSorter>,
	key_maker: Option<CellKeyMaker>,
	domain_box: CoordBox,
	region_box: CoordBox,
	sparse_ned: Option<CoordBox>,
	mbrs: Vec<CoordBox>,
	bounds: Vec<(Vec<u8>, Vec<u8>)>,
	cell_counts: Vec<u64>,
	current_tile_cells: u64,
	current_mbr: Option<CoordBox>,
	current_first: Option<Vec<u8>>,
	current_last: Option<Vec<u8>>,
	sealed_tiles: u64,
	finalized: bool,
}

impl FragmentWriter {
	pub(crate) async fn open(
		vfs: Vfs,
		schema: Arc<ArraySchema>,
		config: &Config,
		limits: ConcurrencyLimits,
		array_uri: &str,
		mode: WriteMode,
		attrs: &[&str],
		region: Option<Subarray>,
	) -> Result<FragmentWriter> {
		match mode {
			WriteMode::DenseOrdered | WriteMode::DenseUnordered => {
				ensure_arg!(schema.is_dense(), "dense write modes need a dense array");
			}
			WriteMode::SparseUnordered => {
				ensure_arg!(schema.is_sparse(), "sparse write modes need a sparse array");
			}
		}

		let mut attr_order = Vec::with_capacity(attrs.len());
		for &name in attrs {
			let Some((index, _)) = schema.attribute(name) else {
				bail_invalid!("unknown attribute '{name}'");
			};
			attr_order.push(index);
		}
		ensure_arg!(attr_order.iter().all_unique(), "attributes must be named at most once");
		ensure_arg!(
			attr_order.len() == schema.attributes.len(),
			"a write must cover all {} attributes, {} were named",
			schema.attributes.len(),
			attrs.len()
		);

		let domain_box = domain_of(&schema)?;
		let (grid, region, region_tiles, tile_volume, region_box) = if schema.is_dense() {
			let grid = DenseGrid::new(&schema)?;
			let region_box = match region {
				Some(subarray) => {
					let clipped = subarray
						.clip_to_schema(&schema)?
						.ok_or_else(|| gridstore_core::Error::InvalidArgument("write region is empty".to_string()))?;
					ensure_arg!(
						clipped.to_subarray() == subarray,
						"write region must lie inside the array domain"
					);
					clipped
				}
				None => domain_box.clone(),
			};
			let ranges = region_box.to_int_ranges()?;
			let lo: Vec<i64> = ranges.iter().map(|[lo, _]| *lo).collect();
			let hi: Vec<i64> = ranges.iter().map(|[_, hi]| *hi).collect();
			ensure_arg!(
				grid.region_is_tile_aligned(&lo, &hi),
				"dense write regions must start and end on tile boundaries"
			);
			let tiles = grid.region_tiles(&lo, &hi);
			let volume = grid.tile_volume();
			(Some(grid), Some((lo, hi)), tiles, volume, region_box)
		} else {
			ensure_arg!(region.is_none(), "sparse writes do not take a write region");
			(None, None, Vec::new(), 0, domain_box.clone())
		};

		let key_maker = if schema.is_sparse() {
			Some(CellKeyMaker::new(&schema)?)
		} else {
			None
		};
		let sorter = match mode {
			WriteMode::DenseOrdered => None,
			_ => Some(CellSorter::new(config.sort_buffer_size)),
		};

		let fragment_name = fragment::new_fragment_name();
		let fragment_uri = uri::join(array_uri, &fragment_name);
		vfs.create_dir(&fragment_uri).await?;
		log::trace!("opened fragment {fragment_uri} in {mode:?} mode");

		let files: Vec<FileState> = fragment::data_files(&schema)
			.into_iter()
			.map(|spec| FileState {
				path: uri::join(&fragment_uri, &spec.name),
				spec,
				offsets: Vec::new(),
				size: 0,
			})
			.collect();

		let mut buffers: Vec<TileBuffer> = schema.attributes.iter().map(TileBuffer::for_attribute).collect();
		if schema.is_sparse() {
			buffers.push(TileBuffer::for_coords(schema.rank() as usize));
		}

		Ok(FragmentWriter {
			vfs,
			capacity: schema.capacity,
			limits,
			mode,
			fragment_uri,
			attr_order,
			files,
			buffers,
			grid,
			region,
			region_tiles,
			tile_volume,
			sorter,
			key_maker,
			domain_box,
			region_box,
			sparse_ned: None,
			mbrs: Vec::new(),
			bounds: Vec::new(),
			cell_counts: Vec::new(),
			current_tile_cells: 0,
			current_mbr: None,
			current_first: None,
			current_last: None,
			sealed_tiles: 0,
			finalized: false,
			schema,
		})
	}

	/// The fragment directory this writer populates.
	#[must_use]
	pub fn fragment_uri(&self) -> &str {
		&self.fragment_uri
	}

	/// Appends cells. Ordered mode expects values in the global cell order
	/// of the write region; unordered modes additionally take the raw
	/// coordinate tuples, one per cell.
	pub async fn submit(&mut self, buffers: &[WriteBuffer<'_>], coords: Option<&[u8]>) -> Result<()> {
		ensure_arg!(!self.finalized, "the writer is already finalized");
		ensure_arg!(
			buffers.len() == self.attr_order.len(),
			"submit carries {} buffers for {} attributes",
			buffers.len(),
			self.attr_order.len()
		);

		let mut cells: Option<u64> = None;
		for (slot, buffer) in buffers.iter().enumerate() {
			let attribute = &self.schema.attributes[self.attr_order[slot]];
			let count = buffer_cells(attribute, buffer)?;
			match cells {
				None => cells = Some(count),
				Some(previous) => ensure_arg!(
					previous == count,
					"attribute '{}' carries {count} cells, earlier buffers carry {previous}",
					attribute.name
				),
			}
		}
		let cells = cells.unwrap_or(0);

		match self.mode {
			WriteMode::DenseOrdered => {
				ensure_arg!(coords.is_none(), "ordered dense writes do not take coordinates");
				self.submit_ordered(buffers, cells).await
			}
			WriteMode::DenseUnordered | WriteMode::SparseUnordered => {
				let Some(coords) = coords else {
					bail_invalid!("unordered writes need a coordinate buffer");
				};
				let tuple_size = self.schema.coords_size();
				ensure_arg!(
					coords.len() as u64 == cells * tuple_size,
					"coordinate buffer carries {} bytes for {cells} cells of {tuple_size} bytes",
					coords.len()
				);
				self.submit_unordered(buffers, coords, cells)
			}
		}
	}

	async fn submit_ordered(&mut self, buffers: &[WriteBuffer<'_>], cells: u64) -> Result<()> {
		for index in 0..cells as usize {
			if self.sealed_tiles as usize >= self.region_tiles.len() && self.current_tile_cells == 0 {
				bail_invalid!("more cells than the write region holds");
			}
			for (slot, buffer) in buffers.iter().enumerate() {
				let attr_index = self.attr_order[slot];
				let value = cell_value(&self.schema.attributes[attr_index], buffer, index);
				self.buffers[attr_index].push(value);
			}
			self.current_tile_cells += 1;
			if self.current_tile_cells == self.tile_volume {
				self.seal_dense_tile().await?;
			}
		}
		Ok(())
	}

	fn submit_unordered(&mut self, buffers: &[WriteBuffer<'_>], coords: &[u8], cells: u64) -> Result<()> {
		let tuple_size = self.schema.coords_size() as usize;
		for index in 0..cells as usize {
			let tuple = &coords[index * tuple_size..(index + 1) * tuple_size];
			ensure_arg!(
				self.domain_box.contains(tuple),
				"cell {index} of this submit lies outside the array domain"
			);

			let key = match self.mode {
				WriteMode::DenseUnordered => {
					ensure_arg!(
						self.region_box.contains(tuple),
						"cell {index} of this submit lies outside the write region"
					);
					let grid = self.grid.as_ref().expect("dense writers have a grid");
					let cell: Vec<i64> = tuple.chunks_exact(COORD_WORD).map(decode_i64).collect();
					let tile_coords = grid.tile_coords_of(&cell);
					let tile_lo = grid.tile_lo(&tile_coords);
					let mut key = Vec::with_capacity(16);
					key.extend_from_slice(&grid.tile_id(&tile_coords).to_be_bytes());
					key.extend_from_slice(&grid.cell_pos(&cell, &tile_lo).to_be_bytes());
					key
				}
				_ => {
					let maker = self.key_maker.as_ref().expect("sparse writers have a key maker");
					match &mut self.sparse_ned {
						Some(ned) => ned.expand_tuple(tuple),
						None => self.sparse_ned = Some(CoordBox::from_tuple(self.domain_box.datatype, tuple)),
					}
					maker.key(tuple)
				}
			};

			let mut values = vec![Vec::new(); self.attr_order.len()];
			for (slot, buffer) in buffers.iter().enumerate() {
				let attr_index = self.attr_order[slot];
				values[attr_index] = cell_value(&self.schema.attributes[attr_index], buffer, index).to_vec();
			}
			self
				.sorter
				.as_mut()
				.expect("unordered writers have a sorter")
				.push(CellRecord {
					key,
					coords: tuple.to_vec(),
					values,
				})?;
		}
		Ok(())
	}

	/// Flushes partial state, writes book-keeping and then the visibility
	/// sentinel. On any error before the sentinel the fragment stays
	/// invisible.
	pub async fn finalize(mut self) -> Result<()> {
		ensure_arg!(!self.finalized, "the writer is already finalized");
		self.finalized = true;

		match self.mode {
			WriteMode::DenseOrdered => {
				ensure_arg!(
					self.current_tile_cells == 0 && self.sealed_tiles as usize == self.region_tiles.len(),
					"ordered dense write covered {} of {} tiles",
					self.sealed_tiles,
					self.region_tiles.len()
				);
			}
			WriteMode::DenseUnordered => self.drain_dense_sorted().await?,
			WriteMode::SparseUnordered => self.drain_sparse_sorted().await?,
		}

		for file in &self.files {
			if file.size > 0 {
				self.vfs.commit(&file.path).await?;
			}
		}

		let non_empty_domain = if self.schema.is_sparse() {
			self.sparse_ned.clone().unwrap_or_else(|| self.domain_box.clone())
		} else {
			self.region_box.clone()
		};
		let meta = FragmentMeta {
			sparse: self.schema.is_sparse(),
			coords_type: self.schema.coords_type(),
			non_empty_domain,
			tile_offsets: self.files.iter().map(|file| file.offsets.clone()).collect(),
			mbrs: std::mem::take(&mut self.mbrs),
			bounds: std::mem::take(&mut self.bounds),
			cell_counts: std::mem::take(&mut self.cell_counts),
		};
		let book_keeping_path = uri::join(&self.fragment_uri, BOOK_KEEPING_FILE);
		self.vfs.append(&book_keeping_path, &meta.to_blob()?).await?;
		self.vfs.commit(&book_keeping_path).await?;

		let ok_path = uri::join(&self.fragment_uri, OK_FILE);
		self.vfs.append(&ok_path, &Blob::new_empty()).await?;
		self.vfs.commit(&ok_path).await?;
		log::trace!(
			"finalized fragment {} with {} tiles, {} cells",
			self.fragment_uri,
			meta.tile_count(),
			meta.total_cells()
		);
		Ok(())
	}

	async fn drain_dense_sorted(&mut self) -> Result<()> {
		let sorter = self.sorter.take().expect("unordered writers have a sorter");
		let (lo, hi) = self.region.clone().expect("dense writers have a region");
		let expected = DenseGrid::region_volume(&lo, &hi);
		ensure_arg!(
			sorter.cell_count == expected,
			"unordered dense write carries {} cells, the region holds {expected}",
			sorter.cell_count
		);

		let mut sorted = sorter.into_sorted()?;
		let mut previous: Option<Vec<u8>> = None;
		while let Some(record) = sorted.next_cell()? {
			if previous.as_ref() == Some(&record.key) {
				bail_invalid!("unordered dense write assigns one cell twice");
			}
			for (attr_index, value) in record.values.iter().enumerate() {
				self.buffers[attr_index].push(value);
			}
			self.current_tile_cells += 1;
			if self.current_tile_cells == self.tile_volume {
				self.seal_dense_tile().await?;
			}
			previous = Some(record.key);
		}
		debug_assert_eq!(self.current_tile_cells, 0);
		Ok(())
	}

	async fn drain_sparse_sorted(&mut self) -> Result<()> {
		let sorter = self.sorter.take().expect("unordered writers have a sorter");
		let mut sorted = sorter.into_sorted()?;
		while let Some(record) = sorted.next_cell()? {
			for (attr_index, value) in record.values.iter().enumerate() {
				self.buffers[attr_index].push(value);
			}
			let coords_buffer = self.buffers.last_mut().expect("sparse writers have a coordinate buffer");
			coords_buffer.push(&record.coords);

			match &mut self.current_mbr {
				Some(mbr) => mbr.expand_tuple(&record.coords),
				None => self.current_mbr = Some(CoordBox::from_tuple(self.domain_box.datatype, &record.coords)),
			}
			if self.current_first.is_none() {
				self.current_first = Some(record.coords.clone());
			}
			self.current_last = Some(record.coords);

			self.current_tile_cells += 1;
			if self.current_tile_cells == self.capacity {
				self.seal_sparse_tile().await?;
			}
		}
		if self.current_tile_cells > 0 {
			self.seal_sparse_tile().await?;
		}
		Ok(())
	}

	async fn seal_dense_tile(&mut self) -> Result<()> {
		let Some(tile_coords) = self.region_tiles.get(self.sealed_tiles as usize).cloned() else {
			bail_invalid!("more cells than the write region holds");
		};
		let grid = self.grid.as_ref().expect("dense writers have a grid");
		let first = encode_tuple(&grid.tile_lo(&tile_coords));
		let last = encode_tuple(&grid.tile_hi(&tile_coords));
		self.bounds.push((first, last));
		self.cell_counts.push(self.current_tile_cells);
		self.current_tile_cells = 0;
		self.sealed_tiles += 1;
		self.seal_row().await
	}

	async fn seal_sparse_tile(&mut self) -> Result<()> {
		let mbr = self.current_mbr.take().expect("a sparse tile has at least one cell");
		let first = self.current_first.take().expect("a sparse tile has a first cell");
		let last = self.current_last.take().expect("a sparse tile has a last cell");
		self.mbrs.push(mbr);
		self.bounds.push((first, last));
		self.cell_counts.push(self.current_tile_cells);
		self.current_tile_cells = 0;
		self.sealed_tiles += 1;
		self.seal_row().await
	}

	/// Drains every buffer into one tile per data file, compresses the
	/// independent tiles in parallel (first failure wins) and appends them
	/// in file order.
	async fn seal_row(&mut self) -> Result<()> {
		let mut jobs: Vec<(Blob, Compression, usize)> = Vec::with_capacity(self.files.len());
		let mut file_cursor = 0;
		for buffer in &mut self.buffers {
			for (payload, _) in buffer.take_payloads()? {
				let spec = &self.files[file_cursor].spec;
				jobs.push((payload, spec.compression, spec.elem_size));
				file_cursor += 1;
			}
		}
		debug_assert_eq!(file_cursor, self.files.len());

		let tasks: Vec<_> = jobs
			.into_iter()
			.map(|(raw, compression, elem_size)| run_compute(move || frame_tile(&raw, &compression, elem_size)))
			.collect();
		let framed = join_bounded(self.limits.cpu_bound, tasks).await?;

		for (index, framed) in framed.into_iter().enumerate() {
			let file = &mut self.files[index];
			file.offsets.push(file.size);
			file.size += framed.len();
			self.vfs.append(&file.path, &framed).await?;
		}
		Ok(())
	}
}

fn domain_of(schema: &ArraySchema) -> Result<CoordBox> {
	match schema.coords_type() {
		gridstore_core::Datatype::Float64 => {
			let ranges: Vec<[f64; 2]> = schema
				.dimensions
				.iter()
				.map(|dimension| match dimension.domain {
					crate::schema::DimensionDomain::Float { domain, .. } => domain,
					crate::schema::DimensionDomain::Int { .. } => [0.0, 0.0],
				})
				.collect();
			Ok(CoordBox::from_float(&ranges))
		}
		_ => {
			let ranges: Vec<[i64; 2]> = schema.int_dimensions()?.iter().map(|(domain, _)| *domain).collect();
			Ok(CoordBox::from_int(&ranges))
		}
	}
}

fn encode_tuple(cell: &[i64]) -> Vec<u8> {
	let mut out = Vec::with_capacity(cell.len() * COORD_WORD);
	for value in cell {
		out.extend_from_slice(&encode_i64(*value));
	}
	out
}

fn buffer_cells(attribute: &Attribute, buffer: &WriteBuffer<'_>) -> Result<u64> {
	match attribute.cell_size() {
		Some(cell_size) => {
			ensure_arg!(
				buffer.data.len() as u64 % cell_size == 0,
				"buffer of attribute '{}' is not a whole number of {cell_size} byte cells",
				attribute.name
			);
			Ok(buffer.data.len() as u64 / cell_size)
		}
		None => {
			let Some(offsets) = buffer.offsets else {
				bail_invalid!("attribute '{}' is variable-length and needs an offsets buffer", attribute.name);
			};
			for pair in offsets.windows(2) {
				ensure_arg!(
					pair[0] <= pair[1],
					"offsets of attribute '{}' must not decrease",
					attribute.name
				);
			}
			if let Some(first) = offsets.first() {
				ensure_arg!(*first == 0, "offsets of attribute '{}' must start at zero", attribute.name);
			}
			if let Some(last) = offsets.last() {
				ensure_arg!(
					*last <= buffer.data.len() as u64,
					"offsets of attribute '{}' point past its value buffer",
					attribute.name
				);
			}
			Ok(offsets.len() as u64)
		}
	}
}

fn cell_value<'a>(attribute: &Attribute, buffer: &WriteBuffer<'a>, index: usize) -> &'a [u8] {
	match attribute.cell_size() {
		Some(cell_size) => {
			let cell_size = cell_size as usize;
			&buffer.data[index * cell_size..(index + 1) * cell_size]
		}
		None => {
			let offsets = buffer.offsets.expect("validated variable-length buffer");
			let start = offsets[index] as usize;
			let end = if index + 1 < offsets.len() {
				offsets[index + 1] as usize
			} else {
				buffer.data.len()
			};
			&buffer.data[start..end]
		}
	}
}
