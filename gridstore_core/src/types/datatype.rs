//! Scalar element types of attributes and dimensions.

use crate::{Result, bail_corrupt};
use std::fmt;

/// The scalar element type of an attribute or of the coordinate tuple.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Datatype {
	Int8,
	Int16,
	Int32,
	Int64,
	UInt8,
	UInt16,
	UInt32,
	UInt64,
	Float32,
	Float64,
	/// Fixed-length text; one byte per character.
	Char,
}

impl Datatype {
	/// Size of one element in bytes.
	#[must_use]
	pub fn size(&self) -> usize {
		use Datatype::*;
		match self {
			Int8 | UInt8 | Char => 1,
			Int16 | UInt16 => 2,
			Int32 | UInt32 | Float32 => 4,
			Int64 | UInt64 | Float64 => 8,
		}
	}

	/// `true` for the signed and unsigned integer types.
	#[must_use]
	pub fn is_integer(&self) -> bool {
		use Datatype::*;
		matches!(self, Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32 | UInt64)
	}

	#[must_use]
	pub fn is_float(&self) -> bool {
		matches!(self, Datatype::Float32 | Datatype::Float64)
	}

	/// The on-disk identifier of this type.
	#[must_use]
	pub fn to_u8(&self) -> u8 {
		use Datatype::*;
		match self {
			Int8 => 0,
			Int16 => 1,
			Int32 => 2,
			Int64 => 3,
			UInt8 => 4,
			UInt16 => 5,
			UInt32 => 6,
			UInt64 => 7,
			Float32 => 8,
			Float64 => 9,
			Char => 10,
		}
	}

	/// Decodes an on-disk type identifier.
	pub fn from_u8(value: u8) -> Result<Datatype> {
		use Datatype::*;
		Ok(match value {
			0 => Int8,
			1 => Int16,
			2 => Int32,
			3 => Int64,
			4 => UInt8,
			5 => UInt16,
			6 => UInt32,
			7 => UInt64,
			8 => Float32,
			9 => Float64,
			10 => Char,
			_ => bail_corrupt!("unknown datatype id {value}"),
		})
	}
}

impl fmt::Display for Datatype {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		use Datatype::*;
		let name = match self {
			Int8 => "int8",
			Int16 => "int16",
			Int32 => "int32",
			Int64 => "int64",
			UInt8 => "uint8",
			UInt16 => "uint16",
			UInt32 => "uint32",
			UInt64 => "uint64",
			Float32 => "float32",
			Float64 => "float64",
			Char => "char",
		};
		f.write_str(name)
	}
}
