//! The error type shared by every layer of the engine.
//!
//! Errors are grouped by kind, not by origin: a failed range read surfaces as
//! [`Error::Io`] no matter which backend produced it, a bad magic number is
//! always [`Error::Corruption`]. Filesystem and codec errors propagate to the
//! caller unchanged; nothing is retried internally.

use std::io;
use thiserror::Error;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes of the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
	/// Bad coordinates, unknown attribute, domain mismatch, malformed subarray.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// Array already exists, or an open with an incompatible schema.
	#[error("schema conflict: {0}")]
	SchemaConflict(String),

	/// A filesystem failure, carrying the backend message and the path.
	#[error("i/o failure on '{path}': {source}")]
	Io {
		path: String,
		#[source]
		source: io::Error,
	},

	/// Magic/version mismatch, offset out of range, decompression failure.
	#[error("corruption: {0}")]
	Corruption(String),

	/// Buffer size exceeded, tile too large for backend block limits.
	#[error("capacity exceeded: {0}")]
	Capacity(String),

	/// Operation not available on this backend.
	#[error("unsupported operation: {0}")]
	Unsupported(String),
}

impl Error {
	/// Wraps an [`io::Error`] together with the path it occurred on.
	pub fn io(path: impl Into<String>, source: io::Error) -> Self {
		Error::Io {
			path: path.into(),
			source,
		}
	}

	/// Wraps any error-like value as an i/o failure on `path`.
	pub fn io_other(path: impl Into<String>, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
		Error::Io {
			path: path.into(),
			source: io::Error::other(source),
		}
	}
}
