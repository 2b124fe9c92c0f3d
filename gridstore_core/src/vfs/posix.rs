//! Local POSIX backend.
//!
//! Appends write through immediately; `commit` fsyncs. This is the only
//! backend with advisory locking. With
//! [`Config::keep_file_handles_open`](crate::Config) set, positional reads
//! reuse open handles instead of reopening the file per read.

use super::{FileLock, VirtualFileSystem, uri};
use crate::{Blob, ByteRange, Config, Error, Result, bail_corrupt};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Arc;

/// Filesystem backend for `file://` paths.
#[derive(Debug)]
pub struct PosixFs {
	locking_enabled: bool,
	keep_handles: bool,
	handles: Mutex<HashMap<String, Arc<File>>>,
}

impl PosixFs {
	#[must_use]
	pub fn new(config: &Config) -> Self {
		Self {
			locking_enabled: config.enable_file_locking,
			keep_handles: config.keep_file_handles_open,
			handles: Mutex::new(HashMap::new()),
		}
	}

	fn open_read(&self, path: &str) -> Result<Arc<File>> {
		if self.keep_handles {
			if let Some(file) = self.handles.lock().get(path) {
				return Ok(Arc::clone(file));
			}
		}
		let local = uri::to_local_path(path)?;
		let file = Arc::new(File::open(&local).map_err(|e| Error::io(path, e))?);
		if self.keep_handles {
			self.handles.lock().insert(path.to_string(), Arc::clone(&file));
		}
		Ok(file)
	}

	fn drop_handle(&self, path: &str) {
		if self.keep_handles {
			self.handles.lock().remove(path);
		}
	}

	fn open_lock_file(&self, path: &str) -> Result<File> {
		let local = uri::to_local_path(path)?;
		OpenOptions::new()
			.create(true)
			.truncate(false)
			.read(true)
			.write(true)
			.open(&local)
			.map_err(|e| Error::io(path, e))
	}
}

#[cfg(unix)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
	use std::os::unix::fs::FileExt;
	file.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
	use std::io::{Read, Seek, SeekFrom};
	let mut handle = file;
	handle.seek(SeekFrom::Start(offset))?;
	handle.read_exact(buf)
}

#[async_trait]
impl VirtualFileSystem for PosixFs {
	fn name(&self) -> &str {
		"posix"
	}

	async fn is_dir(&self, path: &str) -> Result<bool> {
		Ok(uri::to_local_path(path)?.is_dir())
	}

	async fn is_file(&self, path: &str) -> Result<bool> {
		Ok(uri::to_local_path(path)?.is_file())
	}

	async fn list(&self, path: &str) -> Result<Vec<String>> {
		let local = uri::to_local_path(path)?;
		let mut children = Vec::new();
		for entry in std::fs::read_dir(&local).map_err(|e| Error::io(path, e))? {
			let entry = entry.map_err(|e| Error::io(path, e))?;
			children.push(uri::join(path, &entry.file_name().to_string_lossy()));
		}
		children.sort();
		Ok(children)
	}

	async fn create_dir(&self, path: &str) -> Result<()> {
		let local = uri::to_local_path(path)?;
		std::fs::create_dir_all(&local).map_err(|e| Error::io(path, e))
	}

	async fn delete_dir(&self, path: &str) -> Result<()> {
		let local = uri::to_local_path(path)?;
		match std::fs::remove_dir_all(&local) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(Error::io(path, e)),
		}
	}

	async fn file_size(&self, path: &str) -> Result<u64> {
		let local = uri::to_local_path(path)?;
		Ok(local.metadata().map_err(|e| Error::io(path, e))?.len())
	}

	async fn read(&self, path: &str, range: &ByteRange) -> Result<Blob> {
		let file = self.open_read(path)?;
		let mut buffer = vec![0u8; range.length as usize];
		match read_at(&file, range.offset, &mut buffer) {
			Ok(()) => Ok(Blob::from(buffer)),
			Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
				bail_corrupt!("short read of {range:?} from '{path}'")
			}
			Err(e) => Err(Error::io(path, e)),
		}
	}

	async fn append(&self, path: &str, data: &Blob) -> Result<()> {
		let local = uri::to_local_path(path)?;
		let mut file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&local)
			.map_err(|e| Error::io(path, e))?;
		file.write_all(data.as_slice()).map_err(|e| Error::io(path, e))
	}

	async fn commit(&self, path: &str) -> Result<()> {
		let local = uri::to_local_path(path)?;
		let file = File::open(&local).map_err(|e| Error::io(path, e))?;
		file.sync_all().map_err(|e| Error::io(path, e))
	}

	async fn delete_file(&self, path: &str) -> Result<()> {
		self.drop_handle(path);
		let local = uri::to_local_path(path)?;
		std::fs::remove_file(&local).map_err(|e| Error::io(path, e))
	}

	async fn move_path(&self, from: &str, to: &str) -> Result<()> {
		self.drop_handle(from);
		let from_local = uri::to_local_path(from)?;
		let to_local = uri::to_local_path(to)?;
		std::fs::rename(&from_local, &to_local).map_err(|e| Error::io(from, e))
	}

	fn supports_locking(&self) -> bool {
		self.locking_enabled
	}

	fn lock_shared(&self, path: &str) -> Result<Option<FileLock>> {
		if !self.locking_enabled {
			return Ok(None);
		}
		let file = self.open_lock_file(path)?;
		file.lock_shared().map_err(|e| Error::io(path, e))?;
		Ok(Some(FileLock::new(file)))
	}

	fn lock_exclusive(&self, path: &str) -> Result<Option<FileLock>> {
		if !self.locking_enabled {
			return Ok(None);
		}
		let file = self.open_lock_file(path)?;
		file.lock().map_err(|e| Error::io(path, e))?;
		Ok(Some(FileLock::new(file)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn fs() -> PosixFs {
		PosixFs::new(&Config::default())
	}

	#[tokio::test]
	async fn test_append_read_and_size() -> Result<()> {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("data.bin").to_string_lossy().to_string();
		let fs = fs();

		fs.append(&path, &Blob::from(&[1u8, 2, 3])).await?;
		fs.append(&path, &Blob::from(&[4u8, 5])).await?;
		fs.commit(&path).await?;

		assert_eq!(fs.file_size(&path).await?, 5);
		let middle = fs.read(&path, &ByteRange::new(1, 3)).await?;
		assert_eq!(middle.as_slice(), &[2, 3, 4]);
		Ok(())
	}

	#[tokio::test]
	async fn test_short_read_fails() -> Result<()> {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("data.bin").to_string_lossy().to_string();
		let fs = fs();
		fs.append(&path, &Blob::from(&[1u8, 2, 3])).await?;
		assert!(fs.read(&path, &ByteRange::new(2, 10)).await.is_err());
		Ok(())
	}

	#[tokio::test]
	async fn test_dir_lifecycle() -> Result<()> {
		let dir = TempDir::new().unwrap();
		let base = dir.path().to_string_lossy().to_string();
		let child = uri::join(&base, "sub");
		let fs = fs();

		assert!(!fs.is_dir(&child).await?);
		fs.create_dir(&child).await?;
		fs.create_dir(&child).await?; // idempotent
		assert!(fs.is_dir(&child).await?);

		fs.append(&uri::join(&child, "f"), &Blob::from("x")).await?;
		let children = fs.list(&base).await?;
		assert_eq!(children, vec![child.clone()]);

		fs.delete_dir(&child).await?;
		fs.delete_dir(&child).await?; // idempotent
		assert!(!fs.is_dir(&child).await?);
		Ok(())
	}

	#[tokio::test]
	async fn test_move_path() -> Result<()> {
		let dir = TempDir::new().unwrap();
		let from = dir.path().join("a").to_string_lossy().to_string();
		let to = dir.path().join("b").to_string_lossy().to_string();
		let fs = fs();
		fs.append(&from, &Blob::from("payload")).await?;
		fs.move_path(&from, &to).await?;
		assert!(!fs.is_file(&from).await?);
		assert_eq!(fs.read_file(&to).await?.as_str(), "payload");
		Ok(())
	}

	#[tokio::test]
	async fn test_file_uri_prefix_is_accepted() -> Result<()> {
		let dir = TempDir::new().unwrap();
		let path = format!("file://{}/data.bin", dir.path().to_string_lossy());
		let fs = fs();
		fs.append(&path, &Blob::from("abc")).await?;
		assert_eq!(fs.read_file(&path).await?.as_str(), "abc");
		Ok(())
	}

	#[test]
	fn test_locking_capability() {
		let fs = fs();
		assert!(fs.supports_locking());
		let unlocked = PosixFs::new(&Config {
			enable_file_locking: false,
			..Config::default()
		});
		assert!(!unlocked.supports_locking());
	}

	#[tokio::test]
	async fn test_shared_locks_coexist() -> Result<()> {
		let dir = TempDir::new().unwrap();
		let lock_path = dir.path().join("lock").to_string_lossy().to_string();
		let fs = fs();
		let first = fs.lock_shared(&lock_path)?;
		let second = fs.lock_shared(&lock_path)?;
		assert!(first.is_some() && second.is_some());
		Ok(())
	}
}
