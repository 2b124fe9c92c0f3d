//! # Context and array lifecycle
//!
//! A [`Context`] owns the process-wide resources: the engine configuration,
//! the shared HTTP client of the object-store backends, the concurrency
//! limits, the schema cache and the per-array tile caches. Everything is
//! created at [`Context::new`] and torn down on drop; there are no hidden
//! singletons.
//!
//! Arrays are directories on one of the virtual filesystems. Opening a
//! reader snapshots the set of committed fragments at that moment; fragments
//! whose visibility sentinel is missing do not exist for readers and can be
//! swept by [`Context::cleanup_array`].

use crate::cache::TileCache;
use crate::consolidate;
use crate::coords::{CellKeyMaker, CoordBox, DenseGrid, Subarray};
use crate::fragment::reader::{AttrSel, DenseCursor, FragmentCursor, FragmentReader, SparseCursor, resolve_attrs};
use crate::fragment::{
	CONSOLIDATION_LOCK_FILE, FragmentWriter, OK_FILE, SCHEMA_FILE, WriteMode, is_fragment_name, meta::FragmentMeta,
};
use crate::read::{ArrayReader, ValueShape};
use crate::schema::ArraySchema;
use gridstore_core::vfs::uri::{self, Scheme};
use gridstore_core::vfs::{AzureBlobFs, MemoryFs, PosixFs, Vfs, WebHdfsFs};
use gridstore_core::{Config, ConcurrencyLimits, Error, Result, bail_invalid, bail_unsupported, join_bounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The entry point of the engine; owns shared resources for all arrays
/// opened through it.
pub struct Context {
	config: Arc<Config>,
	limits: ConcurrencyLimits,
	http: reqwest::Client,
	posix: Arc<PosixFs>,
	memory: Arc<MemoryFs>,
	hdfs: Arc<WebHdfsFs>,
	azure: Mutex<Option<Vfs>>,
	schemas: Mutex<HashMap<String, Arc<ArraySchema>>>,
	caches: Mutex<HashMap<String, Arc<TileCache>>>,
}

impl Context {
	pub fn new(config: Config) -> Result<Context> {
		let http = reqwest::Client::builder()
			.build()
			.map_err(|e| Error::io_other("<http client>", e))?;
		let config = config.arc();
		Ok(Context {
			posix: Arc::new(PosixFs::new(&config)),
			memory: Arc::new(MemoryFs::new()),
			hdfs: Arc::new(WebHdfsFs::new(http.clone())?),
			azure: Mutex::new(None),
			schemas: Mutex::new(HashMap::new()),
			caches: Mutex::new(HashMap::new()),
			limits: ConcurrencyLimits::default(),
			http,
			config,
		})
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub(crate) fn limits(&self) -> ConcurrencyLimits {
		self.limits
	}

	/// Resolves the filesystem backend of a path by its URI scheme.
	pub(crate) fn vfs_for(&self, path: &str) -> Result<Vfs> {
		Ok(match uri::scheme_of(path)? {
			Scheme::File => Arc::clone(&self.posix) as Vfs,
			Scheme::Memory => Arc::clone(&self.memory) as Vfs,
			Scheme::Hdfs => Arc::clone(&self.hdfs) as Vfs,
			Scheme::Azure => {
				let mut azure = self.azure.lock();
				if azure.is_none() {
					*azure = Some(Arc::new(AzureBlobFs::from_env(self.http.clone(), Arc::clone(&self.config))?) as Vfs);
				}
				Arc::clone(azure.as_ref().expect("just initialized"))
			}
			Scheme::Gcs => bail_unsupported!("no gs:// backend is available"),
		})
	}

	/// Creates a new array at `array_uri` from a validated schema.
	pub async fn create_array(&self, array_uri: &str, schema: &ArraySchema) -> Result<()> {
		schema.validate()?;
		let vfs = self.vfs_for(array_uri)?;
		let schema_path = uri::join(array_uri, SCHEMA_FILE);
		if vfs.is_file(&schema_path).await? {
			return Err(Error::SchemaConflict(format!("an array already exists at '{array_uri}'")));
		}
		vfs.create_dir(array_uri).await?;
		vfs.append(&schema_path, &schema.to_blob()?).await?;
		vfs.commit(&schema_path).await?;
		log::trace!("created array {array_uri}");
		Ok(())
	}

	/// Whether an array exists at the path.
	pub async fn array_exists(&self, array_uri: &str) -> Result<bool> {
		let vfs = self.vfs_for(array_uri)?;
		vfs.is_file(&uri::join(array_uri, SCHEMA_FILE)).await
	}

	/// Loads (and caches) the schema of an array.
	pub async fn load_schema(&self, array_uri: &str) -> Result<Arc<ArraySchema>> {
		let key = array_uri.trim_end_matches('/').to_string();
		if let Some(schema) = self.schemas.lock().get(&key) {
			return Ok(Arc::clone(schema));
		}
		let vfs = self.vfs_for(array_uri)?;
		let schema_path = uri::join(array_uri, SCHEMA_FILE);
		if !vfs.is_file(&schema_path).await? {
			bail_invalid!("'{array_uri}' is not an array");
		}
		let schema = Arc::new(ArraySchema::from_blob(&vfs.read_file(&schema_path).await?)?);
		self.schemas.lock().insert(key, Arc::clone(&schema));
		Ok(schema)
	}

	fn cache_for(&self, array_uri: &str) -> Arc<TileCache> {
		let key = array_uri.trim_end_matches('/').to_string();
		let mut caches = self.caches.lock();
		Arc::clone(
			caches
				.entry(key)
				.or_insert_with(|| Arc::new(TileCache::new(self.config.cache_size))),
		)
	}

	fn forget(&self, array_uri: &str) {
		let key = array_uri.trim_end_matches('/');
		self.schemas.lock().remove(key);
		self.caches.lock().remove(key);
	}

	/// The committed fragments of an array, newest first.
	pub(crate) async fn visible_fragments(&self, vfs: &Vfs, array_uri: &str) -> Result<Vec<String>> {
		let mut names = Vec::new();
		for child in vfs.list(array_uri).await? {
			let name = uri::file_name(&child).to_string();
			if is_fragment_name(&name) && vfs.is_file(&uri::join(&child, OK_FILE)).await? {
				names.push(name);
			}
		}
		// Lexicographic order equals write order; newest first.
		names.sort_by(|a, b| b.cmp(a));
		Ok(names)
	}

	pub(crate) async fn fragment_meta(&self, vfs: &Vfs, array_uri: &str, name: &str, schema: &ArraySchema) -> Result<FragmentMeta> {
		let path = uri::join(&uri::join(array_uri, name), crate::fragment::BOOK_KEEPING_FILE);
		FragmentMeta::from_blob(&vfs.read_file(&path).await?, schema)
	}

	/// Opens a writer that produces one new fragment.
	///
	/// `attrs` names every attribute of the schema and fixes the buffer
	/// order of `submit`. Dense modes take a tile-aligned write region
	/// (default: the whole domain).
	pub async fn open_writer(
		&self,
		array_uri: &str,
		mode: WriteMode,
		attrs: &[&str],
		region: Option<Subarray>,
	) -> Result<FragmentWriter> {
		let schema = self.load_schema(array_uri).await?;
		let vfs = self.vfs_for(array_uri)?;
		FragmentWriter::open(vfs, schema, &self.config, self.limits, array_uri, mode, attrs, region).await
	}

	/// Opens a merged reader over the current snapshot of the array.
	///
	/// `attrs` may name attributes of the schema and, for sparse arrays,
	/// the reserved coordinate attribute `__coords`.
	pub async fn open_reader(&self, array_uri: &str, subarray: Subarray, attrs: &[&str]) -> Result<ArrayReader> {
		self.open_reader_opts(array_uri, subarray, attrs, true).await
	}

	pub(crate) async fn open_reader_opts(
		&self,
		array_uri: &str,
		subarray: Subarray,
		attrs: &[&str],
		take_lock: bool,
	) -> Result<ArrayReader> {
		let schema = self.load_schema(array_uri).await?;
		let vfs = self.vfs_for(array_uri)?;
		let sels = Arc::new(resolve_attrs(&schema, attrs)?);
		let shapes: Vec<ValueShape> = sels
			.iter()
			.map(|sel| match sel {
				AttrSel::Fixed { cell_size, .. } => ValueShape::Fixed { cell_size: *cell_size },
				AttrSel::Var { .. } => ValueShape::Var,
				AttrSel::Coords => ValueShape::Fixed {
					cell_size: schema.coords_size() as usize,
				},
			})
			.collect();

		// Readers hold a shared advisory lock where the backend has one, so
		// consolidation cannot retire fragments under them.
		let lock = if take_lock {
			vfs.lock_shared(&uri::join(array_uri, CONSOLIDATION_LOCK_FILE))?
		} else {
			None
		};

		let Some(clip) = subarray.clip_to_schema(&schema)? else {
			return Ok(ArrayReader::new_empty(shapes, lock));
		};

		let fragments = self.visible_fragments(&vfs, array_uri).await?;
		if fragments.is_empty() {
			return Ok(ArrayReader::new_empty(shapes, lock));
		}

		let cache = self.cache_for(array_uri);
		let opens: Vec<_> = fragments
			.iter()
			.map(|name| {
				FragmentReader::open(
					Arc::clone(&vfs),
					Arc::clone(&schema),
					Arc::clone(&cache),
					array_uri,
					name,
				)
			})
			.collect();
		let readers = join_bounded(self.limits.io_bound, opens).await?;

		let mut cursors = Vec::with_capacity(readers.len());
		if schema.is_dense() {
			let grid = Arc::new(DenseGrid::new(&schema)?);
			for reader in readers {
				cursors.push(FragmentCursor::Dense(DenseCursor::new(
					reader,
					Arc::clone(&grid),
					Arc::clone(&sels),
					&clip,
				)?));
			}
		} else {
			let keys = Arc::new(CellKeyMaker::new(&schema)?);
			for reader in readers {
				cursors.push(FragmentCursor::Sparse(SparseCursor::new(
					reader,
					Arc::clone(&sels),
					Arc::clone(&keys),
					&clip,
				)));
			}
		}
		ArrayReader::new(cursors, shapes, lock).await
	}

	/// Deletes an array and everything under it.
	pub async fn delete_array(&self, array_uri: &str) -> Result<()> {
		let vfs = self.vfs_for(array_uri)?;
		vfs.delete_dir(array_uri).await?;
		self.forget(array_uri);
		log::trace!("deleted array {array_uri}");
		Ok(())
	}

	/// Renames an array within one filesystem. Across filesystems, and on
	/// backends without rename, this surfaces an error.
	pub async fn move_array(&self, from: &str, to: &str) -> Result<()> {
		if uri::scheme_of(from)? != uri::scheme_of(to)? {
			bail_unsupported!("moving an array across filesystems is not available");
		}
		let vfs = self.vfs_for(from)?;
		vfs.move_path(from, to).await?;
		self.forget(from);
		self.forget(to);
		Ok(())
	}

	/// Removes fragment directories whose visibility sentinel never landed
	/// (crashed or abandoned writes). Returns how many were swept.
	pub async fn cleanup_array(&self, array_uri: &str) -> Result<u64> {
		let vfs = self.vfs_for(array_uri)?;
		let mut removed = 0;
		for child in vfs.list(array_uri).await? {
			let name = uri::file_name(&child).to_string();
			if is_fragment_name(&name) && !vfs.is_file(&uri::join(&child, OK_FILE)).await? {
				log::debug!("sweeping uncommitted fragment {child}");
				vfs.delete_dir(&child).await?;
				removed += 1;
			}
		}
		Ok(removed)
	}

	/// The union of the non-empty domains of all committed fragments, or
	/// `None` for an array without committed cells.
	pub async fn non_empty_domain(&self, array_uri: &str) -> Result<Option<Subarray>> {
		let schema = self.load_schema(array_uri).await?;
		let vfs = self.vfs_for(array_uri)?;
		let mut union: Option<CoordBox> = None;
		for name in self.visible_fragments(&vfs, array_uri).await? {
			let meta = self.fragment_meta(&vfs, array_uri, &name, &schema).await?;
			if meta.tile_count() == 0 {
				continue;
			}
			match &mut union {
				Some(bounds) => bounds.expand(&meta.non_empty_domain),
				None => union = Some(meta.non_empty_domain),
			}
		}
		Ok(union.map(|bounds| bounds.to_subarray()))
	}

	/// Merges all committed fragments into one and retires the originals.
	pub async fn consolidate(&self, array_uri: &str) -> Result<()> {
		consolidate::consolidate_array(self, array_uri).await
	}
}

impl std::fmt::Debug for Context {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Context").field("config", &self.config).finish()
	}
}
