//! # Virtual filesystem
//!
//! One capability set with backend-specific implementations: local POSIX
//! directories, an in-memory store with object-store visibility semantics,
//! Azure Blob storage and HDFS (WebHDFS REST). The engine depends only on
//! [`VirtualFileSystem`]; every path is a full URI in the backend's scheme.
//!
//! Appends may be buffered by a backend; [`VirtualFileSystem::commit`] makes
//! pending appends durable and visible. On object stores this issues the
//! block-list commit; until then the file does not exist for readers.

mod azure;
mod hdfs;
mod memory;
mod posix;
pub mod uri;

pub use azure::AzureBlobFs;
pub use hdfs::WebHdfsFs;
pub use memory::MemoryFs;
pub use posix::PosixFs;

use crate::{Blob, ByteRange, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Shared handle to a filesystem backend.
pub type Vfs = Arc<dyn VirtualFileSystem>;

/// The filesystem capabilities the engine consumes.
#[async_trait]
pub trait VirtualFileSystem: Debug + Send + Sync {
	/// Short backend name used in log lines.
	fn name(&self) -> &str;

	/// Whether `path` exists and is a directory. On object stores a
	/// directory is a common prefix or a `.dir.marker` placeholder.
	async fn is_dir(&self, path: &str) -> Result<bool>;

	/// Whether `path` exists and is a regular file.
	async fn is_file(&self, path: &str) -> Result<bool>;

	/// Immediate children of a directory, as full paths.
	async fn list(&self, path: &str) -> Result<Vec<String>>;

	/// Creates a directory. Idempotent.
	async fn create_dir(&self, path: &str) -> Result<()>;

	/// Removes a directory and everything under it. Idempotent.
	async fn delete_dir(&self, path: &str) -> Result<()>;

	/// Byte length of a file.
	async fn file_size(&self, path: &str) -> Result<u64>;

	/// Positional read returning exactly `range.length` bytes, or an error.
	async fn read(&self, path: &str, range: &ByteRange) -> Result<Blob>;

	/// Reads a whole file.
	async fn read_file(&self, path: &str) -> Result<Blob> {
		let length = self.file_size(path).await?;
		self.read(path, &ByteRange::new(0, length)).await
	}

	/// Appends bytes to a file, creating it on first use. Object stores may
	/// buffer until [`commit`](Self::commit).
	async fn append(&self, path: &str, data: &Blob) -> Result<()>;

	/// Makes pending appends durable and visible.
	async fn commit(&self, path: &str) -> Result<()>;

	/// Unlinks a file.
	async fn delete_file(&self, path: &str) -> Result<()>;

	/// Renames within this filesystem. Backends without rename surface
	/// [`Error::Unsupported`](crate::Error::Unsupported).
	async fn move_path(&self, from: &str, to: &str) -> Result<()>;

	/// Whether advisory locking is available. True only for local POSIX.
	fn supports_locking(&self) -> bool {
		false
	}

	/// Takes a shared advisory lock on `path`, blocking until granted.
	/// Returns `None` where locking is unsupported.
	fn lock_shared(&self, _path: &str) -> Result<Option<FileLock>> {
		Ok(None)
	}

	/// Takes an exclusive advisory lock on `path`, blocking until granted.
	/// Returns `None` where locking is unsupported.
	fn lock_exclusive(&self, _path: &str) -> Result<Option<FileLock>> {
		Ok(None)
	}
}

/// A held advisory lock; released on drop.
#[derive(Debug)]
pub struct FileLock {
	_file: std::fs::File,
}

impl FileLock {
	pub(crate) fn new(file: std::fs::File) -> Self {
		Self { _file: file }
	}
}
