//! This module defines the [`ValueReader`] trait for deserializing scalar
//! values, length-prefixed strings and raw byte runs from a source with a
//! fixed byte order.

use crate::{Blob, Error, Result, bail_corrupt};
use byteorder::{ByteOrder, ReadBytesExt};
use std::io::{Read, Seek};

/// Alias for sources that support both seeking and reading.
pub trait SeekRead: Seek + Read {}
impl<T: Seek + Read> SeekRead for T {}

/// A reader of binary values with a fixed byte order.
pub trait ValueReader<E: ByteOrder> {
	/// Returns the underlying reader to access raw bytes.
	fn get_reader(&mut self) -> &mut dyn SeekRead;

	/// Total length of the readable data.
	fn len(&self) -> u64;

	/// Current position within the readable data.
	fn position(&mut self) -> u64;

	/// Moves the read position.
	fn set_position(&mut self, position: u64) -> Result<()>;

	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn remaining(&mut self) -> u64 {
		self.len() - self.position()
	}

	fn has_remaining(&mut self) -> bool {
		self.remaining() > 0
	}

	fn read_u8(&mut self) -> Result<u8> {
		self.get_reader().read_u8().map_err(wrap)
	}

	fn read_u16(&mut self) -> Result<u16> {
		self.get_reader().read_u16::<E>().map_err(wrap)
	}

	fn read_u32(&mut self) -> Result<u32> {
		self.get_reader().read_u32::<E>().map_err(wrap)
	}

	fn read_u64(&mut self) -> Result<u64> {
		self.get_reader().read_u64::<E>().map_err(wrap)
	}

	fn read_i32(&mut self) -> Result<i32> {
		self.get_reader().read_i32::<E>().map_err(wrap)
	}

	fn read_i64(&mut self) -> Result<i64> {
		self.get_reader().read_i64::<E>().map_err(wrap)
	}

	fn read_f32(&mut self) -> Result<f32> {
		self.get_reader().read_f32::<E>().map_err(wrap)
	}

	fn read_f64(&mut self) -> Result<f64> {
		self.get_reader().read_f64::<E>().map_err(wrap)
	}

	/// Reads exactly `length` bytes.
	fn read_blob(&mut self, length: u64) -> Result<Blob> {
		if length > self.remaining() {
			bail_corrupt!(
				"cannot read {length} bytes, only {} remaining of {}",
				self.remaining(),
				self.len()
			);
		}
		let mut buffer = vec![0u8; length as usize];
		self.get_reader().read_exact(&mut buffer).map_err(wrap)?;
		Ok(Blob::from(buffer))
	}

	/// Reads a UTF-8 string prefixed with its byte length as `u32`.
	fn read_string(&mut self) -> Result<String> {
		let length = self.read_u32()?;
		let bytes = self.read_blob(u64::from(length))?;
		String::from_utf8(bytes.into_vec()).map_err(|e| Error::Corruption(format!("string is not valid UTF-8: {e}")))
	}
}

fn wrap(err: std::io::Error) -> Error {
	Error::Corruption(format!("unexpected end of binary record: {err}"))
}

#[cfg(test)]
mod tests {
	use super::super::ValueReaderSlice;
	use super::*;

	#[test]
	fn test_read_scalars() -> Result<()> {
		let data = [0xFFu8, 1, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
		let mut reader = ValueReaderSlice::new_le(&data);
		assert_eq!(reader.read_u8()?, 0xFF);
		assert_eq!(reader.read_u32()?, 1);
		assert_eq!(reader.read_i64()?, -1);
		assert!(!reader.has_remaining());
		Ok(())
	}

	#[test]
	fn test_read_string() -> Result<()> {
		let data = [5u8, 0, 0, 0, b'h', b'e', b'l', b'l', b'o'];
		let mut reader = ValueReaderSlice::new_le(&data);
		assert_eq!(reader.read_string()?, "hello");
		Ok(())
	}

	#[test]
	fn test_read_past_end_is_corruption() {
		let data = [1u8, 2];
		let mut reader = ValueReaderSlice::new_le(&data);
		let err = reader.read_blob(3).unwrap_err();
		assert!(matches!(err, Error::Corruption(_)));
	}
}
