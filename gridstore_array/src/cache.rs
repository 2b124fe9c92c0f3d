//! Byte-budget LRU cache of decoded tiles.
//!
//! Keys are `(fragment, data file, tile)`; values are reference-counted
//! decoded buffers, so a tile currently exposed to an iterator stays alive
//! when the index evicts it. One mutex guards the index; the buffers
//! themselves are read lock-free.

use gridstore_core::Blob;
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;

/// Cache key of one decoded tile.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TileKey {
	pub fragment: String,
	pub file: u32,
	pub tile: u64,
}

struct Inner {
	lru: LruCache<TileKey, Arc<Blob>>,
	bytes: u64,
}

/// A per-array cache of decoded tiles with a byte budget.
pub struct TileCache {
	inner: Mutex<Inner>,
	budget: u64,
}

impl TileCache {
	#[must_use]
	pub fn new(budget: u64) -> Self {
		Self {
			inner: Mutex::new(Inner {
				lru: LruCache::unbounded(),
				bytes: 0,
			}),
			budget: budget.max(1),
		}
	}

	/// Fetches a tile, marking it most recently used.
	pub fn get(&self, key: &TileKey) -> Option<Arc<Blob>> {
		self.inner.lock().lru.get(key).cloned()
	}

	/// Inserts a decoded tile and evicts least-recently-used entries until
	/// the byte budget holds again. Entries still referenced elsewhere keep
	/// their buffers alive; eviction only drops the cache's reference.
	pub fn insert(&self, key: TileKey, tile: Arc<Blob>) {
		let mut inner = self.inner.lock();
		if let Some(old) = inner.lru.put(key, Arc::clone(&tile)) {
			inner.bytes -= old.len();
		}
		inner.bytes += tile.len();
		while inner.bytes > self.budget && inner.lru.len() > 1 {
			if let Some((evicted_key, evicted)) = inner.lru.pop_lru() {
				log::trace!("evicting tile {evicted_key:?} ({} bytes)", evicted.len());
				inner.bytes -= evicted.len();
			} else {
				break;
			}
		}
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.inner.lock().lru.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Bytes currently accounted against the budget.
	#[must_use]
	pub fn bytes(&self) -> u64 {
		self.inner.lock().bytes
	}
}

impl std::fmt::Debug for TileCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let inner = self.inner.lock();
		f.debug_struct("TileCache")
			.field("entries", &inner.lru.len())
			.field("bytes", &inner.bytes)
			.field("budget", &self.budget)
			.finish()
	}
}
