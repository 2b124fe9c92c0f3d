//! Engine configuration with environment overrides.

use crate::{Error, Result};
use std::sync::Arc;

/// Environment variable overriding [`Config::download_buffer_size`].
pub const ENV_DOWNLOAD_BUFFER_SIZE: &str = "TILEDB_DOWNLOAD_BUFFER_SIZE";
/// Environment variable overriding [`Config::upload_buffer_size`].
pub const ENV_UPLOAD_BUFFER_SIZE: &str = "TILEDB_UPLOAD_BUFFER_SIZE";
/// Set to `1` to skip POSIX advisory locks.
pub const ENV_DISABLE_FILE_LOCKING: &str = "TILEDB_DISABLE_FILE_LOCKING";
/// Set to `1` to reuse file handles across positional reads.
pub const ENV_KEEP_FILE_HANDLES_OPEN: &str = "TILEDB_KEEP_FILE_HANDLES_OPEN";

/// Tuning knobs of the engine. One instance lives in every context.
#[derive(Clone, Debug)]
pub struct Config {
	/// Byte budget of the decoded-tile cache.
	pub cache_size: u64,
	/// In-memory threshold of the unordered-write sort; beyond it, sorted
	/// runs spill to the local scratch directory.
	pub sort_buffer_size: u64,
	/// Reads larger than this are split into parallel range requests on
	/// object-store backends.
	pub download_buffer_size: u64,
	/// Staged block size of object-store uploads. Clamped to the backend
	/// block limit of 100 MiB.
	pub upload_buffer_size: u64,
	/// Whether POSIX advisory locks are taken on array directories.
	pub enable_file_locking: bool,
	/// Whether positional reads reuse open file handles.
	pub keep_file_handles_open: bool,
}

/// Hard upper bound of one staged upload block on object stores.
pub const MAX_UPLOAD_BLOCK_SIZE: u64 = 100 * 1024 * 1024;

impl Default for Config {
	fn default() -> Self {
		Self {
			cache_size: 1024 * 1024 * 1024,
			sort_buffer_size: 128 * 1024 * 1024,
			download_buffer_size: 4 * 1024 * 1024,
			upload_buffer_size: 5 * 1024 * 1024,
			enable_file_locking: true,
			keep_file_handles_open: false,
		}
	}
}

impl Config {
	/// Builds the default configuration with environment overrides applied.
	pub fn from_env() -> Result<Config> {
		let mut config = Config::default();
		if let Some(size) = read_env_u64(ENV_DOWNLOAD_BUFFER_SIZE)? {
			config.download_buffer_size = size;
		}
		if let Some(size) = read_env_u64(ENV_UPLOAD_BUFFER_SIZE)? {
			config.upload_buffer_size = size.min(MAX_UPLOAD_BLOCK_SIZE);
		}
		if env_flag(ENV_DISABLE_FILE_LOCKING) {
			config.enable_file_locking = false;
		}
		if env_flag(ENV_KEEP_FILE_HANDLES_OPEN) {
			config.keep_file_handles_open = true;
		}
		Ok(config)
	}

	/// Wraps the configuration for sharing across handles.
	#[must_use]
	pub fn arc(self) -> Arc<Config> {
		Arc::new(self)
	}
}

fn read_env_u64(name: &str) -> Result<Option<u64>> {
	match std::env::var(name) {
		Ok(value) => {
			let parsed = value
				.parse::<u64>()
				.map_err(|_| Error::InvalidArgument(format!("{name}='{value}' is not a byte count")))?;
			Ok(Some(parsed))
		}
		Err(_) => Ok(None),
	}
}

fn env_flag(name: &str) -> bool {
	std::env::var(name).is_ok_and(|value| value == "1" || value.eq_ignore_ascii_case("true"))
}
