//! In-memory backend with object-store visibility semantics.
//!
//! Appends are staged per path and become visible only after `commit`, which
//! mirrors the block-list protocol of real object stores. Tests use this
//! backend to exercise the commit discipline of the write pipeline without
//! network access.

use super::{VirtualFileSystem, uri};
use crate::{Blob, ByteRange, Error, Result, bail_corrupt};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
struct State {
	files: BTreeMap<String, Vec<u8>>,
	staged: BTreeMap<String, Vec<u8>>,
	dirs: BTreeSet<String>,
}

/// Filesystem backend for `mem://` paths; one namespace per instance.
#[derive(Debug, Default)]
pub struct MemoryFs {
	state: Mutex<State>,
}

impl MemoryFs {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	fn normalize(path: &str) -> String {
		path.trim_end_matches('/').to_string()
	}
}

#[async_trait]
impl VirtualFileSystem for MemoryFs {
	fn name(&self) -> &str {
		"memory"
	}

	async fn is_dir(&self, path: &str) -> Result<bool> {
		let path = Self::normalize(path);
		let prefix = format!("{path}/");
		let state = self.state.lock();
		Ok(state.dirs.contains(&path) || state.files.keys().any(|key| key.starts_with(&prefix)))
	}

	async fn is_file(&self, path: &str) -> Result<bool> {
		Ok(self.state.lock().files.contains_key(&Self::normalize(path)))
	}

	async fn list(&self, path: &str) -> Result<Vec<String>> {
		let path = Self::normalize(path);
		let prefix = format!("{path}/");
		let state = self.state.lock();

		let mut children = BTreeSet::new();
		for key in state.files.keys().chain(state.dirs.iter()) {
			if let Some(rest) = key.strip_prefix(&prefix) {
				if rest.is_empty() {
					continue;
				}
				let first = rest.split('/').next().unwrap_or(rest);
				children.insert(uri::join(&path, first));
			}
		}
		Ok(children.into_iter().collect())
	}

	async fn create_dir(&self, path: &str) -> Result<()> {
		self.state.lock().dirs.insert(Self::normalize(path));
		Ok(())
	}

	async fn delete_dir(&self, path: &str) -> Result<()> {
		let path = Self::normalize(path);
		let prefix = format!("{path}/");
		let mut state = self.state.lock();
		state.dirs.retain(|dir| dir != &path && !dir.starts_with(&prefix));
		state.files.retain(|file, _| !file.starts_with(&prefix));
		state.staged.retain(|file, _| !file.starts_with(&prefix));
		Ok(())
	}

	async fn file_size(&self, path: &str) -> Result<u64> {
		let path = Self::normalize(path);
		let state = self.state.lock();
		state
			.files
			.get(&path)
			.map(|data| data.len() as u64)
			.ok_or_else(|| Error::io(&path, std::io::Error::from(std::io::ErrorKind::NotFound)))
	}

	async fn read(&self, path: &str, range: &ByteRange) -> Result<Blob> {
		let path = Self::normalize(path);
		let state = self.state.lock();
		let Some(data) = state.files.get(&path) else {
			return Err(Error::io(&path, std::io::Error::from(std::io::ErrorKind::NotFound)));
		};
		if range.end() > data.len() as u64 {
			bail_corrupt!("read of {range:?} past the end of '{path}' ({} bytes)", data.len());
		}
		Ok(Blob::from(&data[range.as_range_usize()]))
	}

	async fn append(&self, path: &str, data: &Blob) -> Result<()> {
		let path = Self::normalize(path);
		let mut state = self.state.lock();
		state.staged.entry(path).or_default().extend_from_slice(data.as_slice());
		Ok(())
	}

	async fn commit(&self, path: &str) -> Result<()> {
		let path = Self::normalize(path);
		let mut state = self.state.lock();
		if let Some(staged) = state.staged.remove(&path) {
			state.files.entry(path).or_default().extend_from_slice(&staged);
		}
		Ok(())
	}

	async fn delete_file(&self, path: &str) -> Result<()> {
		let path = Self::normalize(path);
		let mut state = self.state.lock();
		state.staged.remove(&path);
		state
			.files
			.remove(&path)
			.map(|_| ())
			.ok_or_else(|| Error::io(&path, std::io::Error::from(std::io::ErrorKind::NotFound)))
	}

	async fn move_path(&self, from: &str, to: &str) -> Result<()> {
		let from = Self::normalize(from);
		let to = Self::normalize(to);
		let from_prefix = format!("{from}/");
		let mut state = self.state.lock();

		if let Some(data) = state.files.remove(&from) {
			state.files.insert(to, data);
			return Ok(());
		}

		// Directory move: rewrite every key under the prefix.
		let moved_keys: Vec<String> = state
			.files
			.keys()
			.filter(|key| key.starts_with(&from_prefix))
			.cloned()
			.collect();
		let moved_files: Vec<(String, Vec<u8>)> = moved_keys
			.into_iter()
			.map(|key| {
				let data = state.files.remove(&key).unwrap_or_default();
				(key, data)
			})
			.collect();
		let moved_dirs: Vec<String> = state
			.dirs
			.iter()
			.filter(|dir| **dir == from || dir.starts_with(&from_prefix))
			.cloned()
			.collect();
		if moved_files.is_empty() && moved_dirs.is_empty() {
			return Err(Error::io(&from, std::io::Error::from(std::io::ErrorKind::NotFound)));
		}
		for (key, data) in moved_files {
			let new_key = format!("{to}/{}", &key[from_prefix.len()..]);
			state.files.insert(new_key, data);
		}
		for dir in moved_dirs {
			state.dirs.remove(&dir);
			if dir == from {
				state.dirs.insert(to.clone());
			} else {
				state.dirs.insert(format!("{to}/{}", &dir[from_prefix.len()..]));
			}
		}
		Ok(())
	}
}
