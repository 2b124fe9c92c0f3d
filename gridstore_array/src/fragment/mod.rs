//! # Fragments
//!
//! A fragment is the append-only unit of one write session: a directory
//! named `__<timestamp>_<uuid>` holding one contiguous data file per
//! attribute (two for variable-length attributes), the coordinate file of
//! sparse fragments, the book-keeping index and the visibility sentinel.
//! Lexicographic directory-name order equals write order, and a fragment
//! exists for readers only once its sentinel does.

pub mod meta;
pub mod reader;
pub mod writer;

pub use writer::{FragmentWriter, WriteBuffer, WriteMode};

use crate::schema::{ArraySchema, Attribute};
use gridstore_core::codec::Compression;
use std::time::{SystemTime, UNIX_EPOCH};

/// Schema file inside an array directory.
pub const SCHEMA_FILE: &str = "__array_schema.tdb";
/// Lock file used by POSIX readers (shared) and consolidation (exclusive).
pub const CONSOLIDATION_LOCK_FILE: &str = "__consolidation_lock";
/// Book-keeping index inside a fragment directory, gzip-compressed.
pub const BOOK_KEEPING_FILE: &str = "__book_keeping.tdb";
/// Visibility sentinel, written last during commit.
pub const OK_FILE: &str = "__tiledb_fragment.ok";
/// Coordinate file of sparse fragments.
pub const COORDS_FILE: &str = "__coords.tdb";

/// Builds a fresh fragment directory name: wall-clock nanoseconds padded so
/// that lexicographic order equals numeric order, plus a unique token.
#[must_use]
pub fn new_fragment_name() -> String {
	let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
	format!("__{nanos:020}_{}", uuid::Uuid::new_v4().simple())
}

/// The timestamp encoded in a fragment name, if it is one.
#[must_use]
pub fn fragment_timestamp(name: &str) -> Option<u128> {
	let rest = name.strip_prefix("__")?;
	let (timestamp, token) = rest.split_once('_')?;
	if timestamp.is_empty() || token.is_empty() || !timestamp.bytes().all(|byte| byte.is_ascii_digit()) {
		return None;
	}
	timestamp.parse().ok()
}

/// Whether a directory name follows the fragment naming convention.
#[must_use]
pub fn is_fragment_name(name: &str) -> bool {
	fragment_timestamp(name).is_some()
}

/// The role of one data file within a fragment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FileRole {
	/// Fixed-cardinality attribute values.
	Fixed { attr: usize },
	/// Byte offsets of a variable-length attribute.
	VarOffsets { attr: usize },
	/// Values of a variable-length attribute.
	VarValues { attr: usize },
	/// Coordinate tuples of a sparse fragment.
	Coords,
}

/// One data file of a fragment, with the codec its tiles use.
#[derive(Clone, Debug)]
pub(crate) struct DataFile {
	pub name: String,
	pub role: FileRole,
	pub compression: Compression,
	/// Element width handed to the codec (cell size, offset width or one).
	pub elem_size: usize,
}

fn attr_files(index: usize, attribute: &Attribute) -> Vec<DataFile> {
	match attribute.cell_size() {
		Some(cell_size) => vec![DataFile {
			name: format!("{}.tdb", attribute.name),
			role: FileRole::Fixed { attr: index },
			compression: attribute.compression,
			elem_size: cell_size as usize,
		}],
		None => vec![
			DataFile {
				name: format!("{}.tdb", attribute.name),
				role: FileRole::VarOffsets { attr: index },
				compression: attribute.compression,
				elem_size: 8,
			},
			DataFile {
				name: format!("{}_var.tdb", attribute.name),
				role: FileRole::VarValues { attr: index },
				compression: attribute.compression,
				elem_size: 1,
			},
		],
	}
}

/// The ordered data files a fragment of this schema contains. Fixed
/// attributes contribute one file, variable-length attributes two, and
/// sparse fragments append the coordinate file.
pub(crate) fn data_files(schema: &ArraySchema) -> Vec<DataFile> {
	let mut files: Vec<DataFile> = schema
		.attributes
		.iter()
		.enumerate()
		.flat_map(|(index, attribute)| attr_files(index, attribute))
		.collect();
	if schema.is_sparse() {
		files.push(DataFile {
			name: COORDS_FILE.to_string(),
			role: FileRole::Coords,
			compression: schema.coords_compression,
			elem_size: gridstore_core::types::Datatype::Int64.size(),
		});
	}
	files
}
