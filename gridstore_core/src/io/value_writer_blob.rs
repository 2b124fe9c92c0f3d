//! An in-memory [`ValueWriter`] backed by a growable byte buffer.

use super::ValueWriter;
use crate::{Blob, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::io::{Cursor, Write};
use std::marker::PhantomData;

/// A [`ValueWriter`] that collects everything into a [`Blob`].
pub struct ValueWriterBlob<E: ByteOrder> {
	cursor: Cursor<Vec<u8>>,
	_endianness: PhantomData<E>,
}

impl<E: ByteOrder> ValueWriterBlob<E> {
	pub fn new() -> Self {
		Self {
			cursor: Cursor::new(Vec::new()),
			_endianness: PhantomData,
		}
	}

	/// Consumes the writer and returns the collected bytes.
	#[must_use]
	pub fn into_blob(self) -> Blob {
		Blob::from(self.cursor.into_inner())
	}
}

impl ValueWriterBlob<LittleEndian> {
	#[must_use]
	pub fn new_le() -> Self {
		Self::new()
	}
}

impl ValueWriterBlob<BigEndian> {
	#[must_use]
	pub fn new_be() -> Self {
		Self::new()
	}
}

impl<E: ByteOrder> Default for ValueWriterBlob<E> {
	fn default() -> Self {
		Self::new()
	}
}

impl<E: ByteOrder> ValueWriter<E> for ValueWriterBlob<E> {
	fn get_writer(&mut self) -> &mut dyn Write {
		&mut self.cursor
	}

	fn position(&mut self) -> Result<u64> {
		Ok(self.cursor.position())
	}
}
