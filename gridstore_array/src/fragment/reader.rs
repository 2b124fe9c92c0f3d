//! # Fragment reader
//!
//! Streams the cells of one fragment that intersect a subarray, in the
//! array's global cell order. Tile location comes from book-keeping (grid
//! arithmetic for dense fragments, MBR filtering for sparse ones); tile
//! bytes come from positional range reads and land decoded in the per-array
//! tile cache.

use crate::cache::{TileCache, TileKey};
use crate::coords::{COORD_WORD, CellKeyMaker, CoordBox, DenseGrid, encode_i64};
use crate::fragment::{BOOK_KEEPING_FILE, DataFile, FileRole, data_files, meta::FragmentMeta};
use crate::schema::{ArraySchema, COORDS_NAME};
use crate::tile::{offsets_from_blob, var_cell};
use gridstore_core::vfs::{Vfs, uri};
use gridstore_core::{Blob, ByteRange, Result, bail_corrupt, bail_invalid};
use std::sync::Arc;

/// One opened fragment: its book-keeping plus the handles to read tiles.
pub(crate) struct FragmentReader {
	/// Fragment directory name; keys the tile cache.
	pub name: String,
	pub uri: String,
	pub meta: FragmentMeta,
	pub schema: Arc<ArraySchema>,
	vfs: Vfs,
	cache: Arc<TileCache>,
	files: Vec<DataFile>,
	file_sizes: Vec<u64>,
}

impl FragmentReader {
	pub async fn open(
		vfs: Vfs,
		schema: Arc<ArraySchema>,
		cache: Arc<TileCache>,
		array_uri: &str,
		name: &str,
	) -> Result<Arc<FragmentReader>> {
		let fragment_uri = uri::join(array_uri, name);
		let book_keeping = vfs.read_file(&uri::join(&fragment_uri, BOOK_KEEPING_FILE)).await?;
		let meta = FragmentMeta::from_blob(&book_keeping, &schema)?;
		let files = data_files(&schema);

		let mut file_sizes = Vec::with_capacity(files.len());
		for (index, file) in files.iter().enumerate() {
			let size = if meta.tile_count() == 0 {
				0
			} else {
				vfs.file_size(&uri::join(&fragment_uri, &file.name)).await?
			};
			for pair in meta.tile_offsets[index].windows(2) {
				if pair[0] >= pair[1] {
					bail_corrupt!("tile offsets of '{}' are not strictly increasing", file.name);
				}
			}
			if let Some(last) = meta.tile_offsets[index].last() {
				if *last >= size {
					bail_corrupt!("tile offset {last} of '{}' lies past its {size} byte file", file.name);
				}
			}
			file_sizes.push(size);
		}

		Ok(Arc::new(FragmentReader {
			name: name.to_string(),
			uri: fragment_uri,
			meta,
			schema,
			vfs,
			cache,
			files,
			file_sizes,
		}))
	}

	/// Loads and decodes one tile of one data file, through the cache.
	pub async fn load_tile(&self, file_index: usize, tile_index: usize) -> Result<Arc<Blob>> {
		let key = TileKey {
			fragment: self.name.clone(),
			file: file_index as u32,
			tile: tile_index as u64,
		};
		if let Some(tile) = self.cache.get(&key) {
			return Ok(tile);
		}

		let offsets = &self.meta.tile_offsets[file_index];
		let start = offsets[tile_index];
		let end = offsets.get(tile_index + 1).copied().unwrap_or(self.file_sizes[file_index]);
		let file = &self.files[file_index];
		let path = uri::join(&self.uri, &file.name);
		let framed = self.vfs.read(&path, &ByteRange::new(start, end - start)).await?;
		let decoded = Arc::new(gridstore_core::codec::unframe_tile(&framed, file.elem_size)?);
		self.cache.insert(key, Arc::clone(&decoded));
		Ok(decoded)
	}

	/// Index of the coordinate file of a sparse fragment.
	fn coords_file(&self) -> usize {
		self.files.len() - 1
	}
}

/// How one requested attribute maps onto fragment data files.
#[derive(Clone, Debug)]
pub(crate) enum AttrSel {
	Fixed { file: usize, cell_size: usize },
	Var { offsets_file: usize, values_file: usize },
	Coords,
}

/// Resolves requested attribute names against the schema's file layout.
pub(crate) fn resolve_attrs(schema: &ArraySchema, names: &[&str]) -> Result<Vec<AttrSel>> {
	let files = data_files(schema);
	let mut sels = Vec::with_capacity(names.len());
	for &name in names {
		if name == COORDS_NAME {
			sels.push(AttrSel::Coords);
			continue;
		}
		let Some((attr_index, attribute)) = schema.attribute(name) else {
			bail_invalid!("unknown attribute '{name}'");
		};
		let sel = match attribute.cell_size() {
			Some(cell_size) => {
				let file = files
					.iter()
					.position(|file| file.role == FileRole::Fixed { attr: attr_index })
					.expect("fixed attributes have a data file");
				AttrSel::Fixed {
					file,
					cell_size: cell_size as usize,
				}
			}
			None => {
				let offsets_file = files
					.iter()
					.position(|file| file.role == FileRole::VarOffsets { attr: attr_index })
					.expect("variable attributes have an offsets file");
				AttrSel::Var {
					offsets_file,
					values_file: offsets_file + 1,
				}
			}
		};
		sels.push(sel);
	}
	Ok(sels)
}

/// One merged cell leaving a cursor: its global merge key and one value per
/// requested attribute.
pub(crate) struct CellOut {
	pub key: Vec<u8>,
	pub values: Vec<Vec<u8>>,
}

enum LoadedAttr {
	Fixed { tile: Arc<Blob>, cell_size: usize },
	Var { offsets: Vec<u64>, values: Arc<Blob> },
	Coords,
}

/// Streams one fragment's cells intersecting the subarray, in cell order.
pub(crate) enum FragmentCursor {
	Dense(DenseCursor),
	Sparse(SparseCursor),
}

impl FragmentCursor {
	pub async fn next_cell(&mut self) -> Result<Option<CellOut>> {
		match self {
			FragmentCursor::Dense(cursor) => cursor.next_cell().await,
			FragmentCursor::Sparse(cursor) => cursor.next_cell().await,
		}
	}
}

pub(crate) struct DenseCursor {
	reader: Arc<FragmentReader>,
	grid: Arc<DenseGrid>,
	sels: Arc<Vec<AttrSel>>,
	clip_lo: Vec<i64>,
	clip_hi: Vec<i64>,
	/// `(position in fragment, tile coords, global tile id)`, in tile order.
	tiles: Vec<(usize, Vec<i64>, u64)>,
	tile_cursor: usize,
	cells: Vec<(Vec<i64>, u64, u64)>,
	cell_cursor: usize,
	current_tile_id: u64,
	loaded: Vec<LoadedAttr>,
}

impl DenseCursor {
	pub fn new(
		reader: Arc<FragmentReader>,
		grid: Arc<DenseGrid>,
		sels: Arc<Vec<AttrSel>>,
		clip: &CoordBox,
	) -> Result<DenseCursor> {
		let region = reader.meta.non_empty_domain.to_int_ranges()?;
		let region_lo: Vec<i64> = region.iter().map(|[lo, _]| *lo).collect();
		let region_hi: Vec<i64> = region.iter().map(|[_, hi]| *hi).collect();
		let clip_ranges = clip.to_int_ranges()?;
		let clip_lo: Vec<i64> = clip_ranges.iter().map(|[lo, _]| *lo).collect();
		let clip_hi: Vec<i64> = clip_ranges.iter().map(|[_, hi]| *hi).collect();

		let tiles: Vec<(usize, Vec<i64>, u64)> = grid
			.region_tiles(&region_lo, &region_hi)
			.into_iter()
			.enumerate()
			.filter(|(_, tile_coords)| {
				let tile_lo = grid.tile_lo(tile_coords);
				let tile_hi = grid.tile_hi(tile_coords);
				tile_lo
					.iter()
					.zip(&tile_hi)
					.zip(clip_lo.iter().zip(&clip_hi))
					.all(|((lo, hi), (clip_lo, clip_hi))| lo <= clip_hi && hi >= clip_lo)
			})
			.map(|(position, tile_coords)| {
				let id = grid.tile_id(&tile_coords);
				(position, tile_coords, id)
			})
			.collect();

		Ok(DenseCursor {
			reader,
			grid,
			sels,
			clip_lo,
			clip_hi,
			tiles,
			tile_cursor: 0,
			cells: Vec::new(),
			cell_cursor: 0,
			current_tile_id: 0,
			loaded: Vec::new(),
		})
	}

	async fn next_cell(&mut self) -> Result<Option<CellOut>> {
		loop {
			if self.cell_cursor < self.cells.len() {
				let (cell, storage_index, merge_pos) = self.cells[self.cell_cursor].clone();
				self.cell_cursor += 1;

				let mut key = Vec::with_capacity(16);
				key.extend_from_slice(&self.current_tile_id.to_be_bytes());
				key.extend_from_slice(&merge_pos.to_be_bytes());

				let mut values = Vec::with_capacity(self.loaded.len());
				for loaded in &self.loaded {
					values.push(extract_value(loaded, storage_index as usize, || {
						let mut tuple = Vec::with_capacity(cell.len() * COORD_WORD);
						for value in &cell {
							tuple.extend_from_slice(&encode_i64(*value));
						}
						tuple
					})?);
				}
				return Ok(Some(CellOut { key, values }));
			}

			let Some((position, tile_coords, tile_id)) = self.tiles.get(self.tile_cursor).cloned() else {
				return Ok(None);
			};
			self.tile_cursor += 1;
			self.cells = self.grid.cells_in_tile_clipped(&tile_coords, &self.clip_lo, &self.clip_hi);
			self.cell_cursor = 0;
			self.current_tile_id = tile_id;
			if self.cells.is_empty() {
				continue;
			}
			self.loaded = load_selected(&self.reader, &self.sels, position).await?;
		}
	}
}

pub(crate) struct SparseCursor {
	reader: Arc<FragmentReader>,
	sels: Arc<Vec<AttrSel>>,
	keys: Arc<CellKeyMaker>,
	clip: CoordBox,
	tiles: Vec<usize>,
	tile_cursor: usize,
	cell_cursor: usize,
	cell_count: usize,
	coords_tile: Option<Arc<Blob>>,
	loaded: Vec<LoadedAttr>,
}

impl SparseCursor {
	pub fn new(
		reader: Arc<FragmentReader>,
		sels: Arc<Vec<AttrSel>>,
		keys: Arc<CellKeyMaker>,
		clip: &CoordBox,
	) -> SparseCursor {
		let tiles: Vec<usize> = reader
			.meta
			.mbrs
			.iter()
			.enumerate()
			.filter(|(_, mbr)| mbr.intersects(clip))
			.map(|(index, _)| index)
			.collect();
		SparseCursor {
			reader,
			sels,
			keys,
			clip: clip.clone(),
			tiles,
			tile_cursor: 0,
			cell_cursor: 0,
			cell_count: 0,
			coords_tile: None,
			loaded: Vec::new(),
		}
	}

	async fn next_cell(&mut self) -> Result<Option<CellOut>> {
		let tuple_size = self.reader.schema.coords_size() as usize;
		loop {
			if self.cell_cursor < self.cell_count {
				let index = self.cell_cursor;
				self.cell_cursor += 1;

				let coords_tile = self.coords_tile.as_ref().expect("a loaded sparse tile has coordinates");
				let tuple = &coords_tile.as_slice()[index * tuple_size..(index + 1) * tuple_size];
				if !self.clip.contains(tuple) {
					continue;
				}

				let key = self.keys.key(tuple);
				let mut values = Vec::with_capacity(self.loaded.len());
				for loaded in &self.loaded {
					values.push(extract_value(loaded, index, || tuple.to_vec())?);
				}
				return Ok(Some(CellOut { key, values }));
			}

			let Some(tile_index) = self.tiles.get(self.tile_cursor).copied() else {
				return Ok(None);
			};
			self.tile_cursor += 1;

			let coords_tile = self
				.reader
				.load_tile(self.reader.coords_file(), tile_index)
				.await?;
			let expected = self.reader.meta.cell_counts[tile_index] as usize;
			if coords_tile.len() as usize != expected * tuple_size {
				bail_corrupt!(
					"coordinate tile {tile_index} holds {} bytes for {expected} cells",
					coords_tile.len()
				);
			}
			self.coords_tile = Some(coords_tile);
			self.cell_count = expected;
			self.cell_cursor = 0;
			self.loaded = load_selected(&self.reader, &self.sels, tile_index).await?;
		}
	}
}

async fn load_selected(reader: &Arc<FragmentReader>, sels: &[AttrSel], tile_index: usize) -> Result<Vec<LoadedAttr>> {
	let mut loaded = Vec::with_capacity(sels.len());
	for sel in sels {
		let entry = match sel {
			AttrSel::Fixed { file, cell_size } => LoadedAttr::Fixed {
				tile: reader.load_tile(*file, tile_index).await?,
				cell_size: *cell_size,
			},
			AttrSel::Var {
				offsets_file,
				values_file,
			} => {
				let offsets_tile = reader.load_tile(*offsets_file, tile_index).await?;
				LoadedAttr::Var {
					offsets: offsets_from_blob(&offsets_tile)?,
					values: reader.load_tile(*values_file, tile_index).await?,
				}
			}
			AttrSel::Coords => LoadedAttr::Coords,
		};
		loaded.push(entry);
	}
	Ok(loaded)
}

fn extract_value(
	loaded: &LoadedAttr,
	index: usize,
	coords: impl FnOnce() -> Vec<u8>,
) -> Result<Vec<u8>> {
	match loaded {
		LoadedAttr::Fixed { tile, cell_size } => {
			let start = index * cell_size;
			let end = start + cell_size;
			if end > tile.len() as usize {
				bail_corrupt!("cell {index} lies past the end of a {} byte tile", tile.len());
			}
			Ok(tile.as_slice()[start..end].to_vec())
		}
		LoadedAttr::Var { offsets, values } => Ok(var_cell(offsets, values, index)?.to_vec()),
		LoadedAttr::Coords => Ok(coords()),
	}
}
