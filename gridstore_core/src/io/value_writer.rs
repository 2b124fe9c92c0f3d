//! This module defines the [`ValueWriter`] trait for serializing scalar
//! values, length-prefixed strings and raw byte runs into a destination with
//! a fixed byte order.

use crate::{Blob, Error, Result};
use byteorder::{ByteOrder, WriteBytesExt};
use std::io::Write;

/// A writer of binary values with a fixed byte order.
pub trait ValueWriter<E: ByteOrder> {
	/// Returns a mutable reference to the underlying writer.
	fn get_writer(&mut self) -> &mut dyn Write;

	/// Returns the current write position.
	fn position(&mut self) -> Result<u64>;

	fn write_u8(&mut self, value: u8) -> Result<()> {
		self.get_writer().write_u8(value).map_err(wrap)
	}

	fn write_u16(&mut self, value: u16) -> Result<()> {
		self.get_writer().write_u16::<E>(value).map_err(wrap)
	}

	fn write_u32(&mut self, value: u32) -> Result<()> {
		self.get_writer().write_u32::<E>(value).map_err(wrap)
	}

	fn write_u64(&mut self, value: u64) -> Result<()> {
		self.get_writer().write_u64::<E>(value).map_err(wrap)
	}

	fn write_i32(&mut self, value: i32) -> Result<()> {
		self.get_writer().write_i32::<E>(value).map_err(wrap)
	}

	fn write_i64(&mut self, value: i64) -> Result<()> {
		self.get_writer().write_i64::<E>(value).map_err(wrap)
	}

	fn write_f32(&mut self, value: f32) -> Result<()> {
		self.get_writer().write_f32::<E>(value).map_err(wrap)
	}

	fn write_f64(&mut self, value: f64) -> Result<()> {
		self.get_writer().write_f64::<E>(value).map_err(wrap)
	}

	fn write_slice(&mut self, buf: &[u8]) -> Result<()> {
		self.get_writer().write_all(buf).map_err(wrap)
	}

	fn write_blob(&mut self, blob: &Blob) -> Result<()> {
		self.write_slice(blob.as_slice())
	}

	/// Writes a UTF-8 string prefixed with its byte length as `u32`.
	fn write_string(&mut self, text: &str) -> Result<()> {
		self.write_u32(text.len() as u32)?;
		self.write_slice(text.as_bytes())
	}
}

fn wrap(err: std::io::Error) -> Error {
	Error::io("<value writer>", err)
}
