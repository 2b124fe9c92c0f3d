//! This module provides the [`Blob`] struct, a wrapper around [`Vec<u8>`]
//! used for all byte payloads moving between the codec, fragment and
//! filesystem layers.

use super::ByteRange;
use crate::{Result, bail_corrupt};
use std::fmt::Debug;
use std::ops::Range;

/// An owned byte buffer.
///
/// # Examples
///
/// ```rust
/// use gridstore_core::Blob;
///
/// let blob = Blob::from("hello");
/// assert_eq!(blob.len(), 5);
/// assert_eq!(blob.as_slice(), b"hello");
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Blob(Vec<u8>);

impl Blob {
	/// Creates an empty `Blob`.
	#[must_use]
	pub fn new_empty() -> Blob {
		Blob(Vec::new())
	}

	/// Creates a zero-filled `Blob` of the given length.
	#[must_use]
	pub fn new_sized(length: usize) -> Blob {
		Blob(vec![0u8; length])
	}

	/// Returns a byte slice of the given `range`.
	///
	/// # Panics
	///
	/// Panics if the range is out of bounds.
	#[must_use]
	pub fn range(&self, range: Range<usize>) -> &[u8] {
		&self.0[range]
	}

	/// Returns a new [`Blob`] with the bytes of the given [`ByteRange`], or an
	/// error if the range reaches past the end of the buffer.
	pub fn read_range(&self, range: &ByteRange) -> Result<Blob> {
		if range.offset + range.length > self.0.len() as u64 {
			bail_corrupt!("byte range {range:?} reaches past the end of a {} byte buffer", self.0.len());
		}
		Ok(Blob::from(&self.0[range.as_range_usize()]))
	}

	#[must_use]
	pub fn as_slice(&self) -> &[u8] {
		self.0.as_ref()
	}

	pub fn as_mut_slice(&mut self) -> &mut [u8] {
		self.0.as_mut()
	}

	#[must_use]
	pub fn into_vec(self) -> Vec<u8> {
		self.0
	}

	/// Interprets the bytes as UTF-8 text.
	///
	/// # Panics
	///
	/// Panics if the bytes are not valid UTF-8.
	#[must_use]
	pub fn as_str(&self) -> &str {
		std::str::from_utf8(&self.0).expect("Blob content was not valid UTF-8")
	}

	#[must_use]
	pub fn len(&self) -> u64 {
		self.0.len() as u64
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl From<Vec<u8>> for Blob {
	fn from(item: Vec<u8>) -> Self {
		Blob(item)
	}
}

impl From<&[u8]> for Blob {
	fn from(item: &[u8]) -> Self {
		Blob(item.to_vec())
	}
}

impl<const N: usize> From<&[u8; N]> for Blob {
	fn from(item: &[u8; N]) -> Self {
		Blob(item.to_vec())
	}
}

impl From<&str> for Blob {
	fn from(item: &str) -> Self {
		Blob(item.as_bytes().to_vec())
	}
}

impl From<String> for Blob {
	fn from(item: String) -> Self {
		Blob(item.into_bytes())
	}
}

/// Prints the byte length and a hexadecimal prefix of the content.
impl Debug for Blob {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let hex = self
			.0
			.iter()
			.take(32)
			.map(|byte| format!("{byte:02x}"))
			.collect::<Vec<_>>()
			.join(" ");
		let ellipsis = if self.0.len() > 32 { " …" } else { "" };
		write!(f, "Blob({}): {hex}{ellipsis}", self.0.len())
	}
}
