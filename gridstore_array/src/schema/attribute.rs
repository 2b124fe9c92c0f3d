//! Array attributes: named value carriers with an element type, a cell
//! multiplicity and a compression codec.

use gridstore_core::codec::Compression;
use gridstore_core::{Datatype, Result, bail_invalid};

/// Cell multiplicity marker for variable-length attributes.
pub const VAR_NUM: u32 = 0;

/// A named value carrier of an array.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
	pub name: String,
	pub datatype: Datatype,
	/// Values per cell; [`VAR_NUM`] marks a variable cardinality.
	pub cell_val_num: u32,
	pub compression: Compression,
}

impl Attribute {
	/// A fixed-cardinality attribute with one value per cell, uncompressed.
	pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
		Self {
			name: name.into(),
			datatype,
			cell_val_num: 1,
			compression: Compression::None,
		}
	}

	/// A variable-cardinality attribute, uncompressed.
	pub fn new_var(name: impl Into<String>, datatype: Datatype) -> Self {
		Self {
			name: name.into(),
			datatype,
			cell_val_num: VAR_NUM,
			compression: Compression::None,
		}
	}

	#[must_use]
	pub fn with_cell_val_num(mut self, cell_val_num: u32) -> Self {
		self.cell_val_num = cell_val_num;
		self
	}

	#[must_use]
	pub fn with_compression(mut self, compression: Compression) -> Self {
		self.compression = compression;
		self
	}

	#[must_use]
	pub fn is_var(&self) -> bool {
		self.cell_val_num == VAR_NUM
	}

	/// Byte size of one cell value, `None` for variable-length attributes.
	#[must_use]
	pub fn cell_size(&self) -> Option<u64> {
		if self.is_var() {
			None
		} else {
			Some(self.datatype.size() as u64 * u64::from(self.cell_val_num))
		}
	}

	pub(crate) fn validate(&self) -> Result<()> {
		if self.name.is_empty() {
			bail_invalid!("attribute names must not be empty");
		}
		if self.name.starts_with("__") {
			bail_invalid!("attribute name '{}' collides with the reserved prefix '__'", self.name);
		}
		self.compression.validate()
	}
}
