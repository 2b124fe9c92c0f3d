//! URI scheme recognition and path manipulation.
//!
//! Recognized schemes: `file://` (implicit default), `hdfs://`,
//! `az://<container>@<account>.blob.core.windows.net/<path>`, `gs://`
//! (recognized, surfaced as unsupported) and `mem://` (in-memory backend for
//! tests).

use crate::{Result, bail_invalid};
use std::path::PathBuf;

/// The backend family a path belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scheme {
	File,
	Hdfs,
	Azure,
	Gcs,
	Memory,
}

/// Determines the scheme of a path. Paths without a scheme are local files.
pub fn scheme_of(path: &str) -> Result<Scheme> {
	if let Some((scheme, _)) = path.split_once("://") {
		return Ok(match scheme {
			"file" => Scheme::File,
			"hdfs" => Scheme::Hdfs,
			"az" => Scheme::Azure,
			"gs" => Scheme::Gcs,
			"mem" => Scheme::Memory,
			other => bail_invalid!("unrecognized URI scheme '{other}://' in '{path}'"),
		});
	}
	Ok(Scheme::File)
}

/// Joins a child name onto a base path.
#[must_use]
pub fn join(base: &str, child: &str) -> String {
	format!("{}/{}", base.trim_end_matches('/'), child.trim_start_matches('/'))
}

/// The last path component.
#[must_use]
pub fn file_name(path: &str) -> &str {
	path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Converts a `file://` URI (or a plain path) to a local filesystem path.
pub fn to_local_path(path: &str) -> Result<PathBuf> {
	if let Some(rest) = path.strip_prefix("file://") {
		return Ok(PathBuf::from(rest));
	}
	if path.contains("://") {
		bail_invalid!("'{path}' is not a local path");
	}
	Ok(PathBuf::from(path))
}
