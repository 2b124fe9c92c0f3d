//! A [`ValueReader`] over a borrowed byte slice.

use super::{SeekRead, ValueReader};
use crate::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::io::{Cursor, Seek, SeekFrom};
use std::marker::PhantomData;

/// A [`ValueReader`] reading from a borrowed byte slice.
pub struct ValueReaderSlice<'a, E: ByteOrder> {
	cursor: Cursor<&'a [u8]>,
	length: u64,
	_endianness: PhantomData<E>,
}

impl<'a, E: ByteOrder> ValueReaderSlice<'a, E> {
	pub fn new(slice: &'a [u8]) -> Self {
		Self {
			cursor: Cursor::new(slice),
			length: slice.len() as u64,
			_endianness: PhantomData,
		}
	}
}

impl<'a> ValueReaderSlice<'a, LittleEndian> {
	#[must_use]
	pub fn new_le(slice: &'a [u8]) -> Self {
		Self::new(slice)
	}
}

impl<'a> ValueReaderSlice<'a, BigEndian> {
	#[must_use]
	pub fn new_be(slice: &'a [u8]) -> Self {
		Self::new(slice)
	}
}

impl<'a, E: ByteOrder> ValueReader<E> for ValueReaderSlice<'a, E> {
	fn get_reader(&mut self) -> &mut dyn SeekRead {
		&mut self.cursor
	}

	fn len(&self) -> u64 {
		self.length
	}

	fn position(&mut self) -> u64 {
		self.cursor.position()
	}

	fn set_position(&mut self, position: u64) -> Result<()> {
		self
			.cursor
			.seek(SeekFrom::Start(position))
			.map_err(|e| Error::Corruption(format!("cannot seek to {position}: {e}")))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_endianness_constructors() -> Result<()> {
		let data = [0x01u8, 0x02];
		assert_eq!(ValueReaderSlice::new_le(&data).read_u16()?, 0x0201);
		assert_eq!(ValueReaderSlice::new_be(&data).read_u16()?, 0x0102);
		Ok(())
	}

	#[test]
	fn test_position_and_seek() -> Result<()> {
		let data = [0u8, 1, 2, 3];
		let mut reader = ValueReaderSlice::new_le(&data);
		assert_eq!(reader.position(), 0);
		reader.set_position(2)?;
		assert_eq!(reader.read_u8()?, 2);
		assert_eq!(reader.remaining(), 1);
		Ok(())
	}
}
