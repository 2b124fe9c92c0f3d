//! External sort for unordered writes.
//!
//! Cells accumulate in memory up to a byte threshold; beyond it, each batch
//! is sorted and spilled as a run file in the local scratch directory. At
//! finalize the in-memory batch and the runs are k-way merged into one
//! key-ordered stream.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use gridstore_core::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

/// One cell awaiting its fragment position: the global merge key, the raw
/// coordinate tuple and one value per attribute in schema order.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CellRecord {
	pub key: Vec<u8>,
	pub coords: Vec<u8>,
	pub values: Vec<Vec<u8>>,
}

impl CellRecord {
	fn heap_bytes(&self) -> u64 {
		let values: usize = self.values.iter().map(|value| value.len() + 24).sum();
		(self.key.len() + self.coords.len() + values + 72) as u64
	}

	fn write_to(&self, writer: &mut impl Write) -> std::io::Result<()> {
		writer.write_u32::<LittleEndian>(self.key.len() as u32)?;
		writer.write_all(&self.key)?;
		writer.write_u32::<LittleEndian>(self.coords.len() as u32)?;
		writer.write_all(&self.coords)?;
		writer.write_u32::<LittleEndian>(self.values.len() as u32)?;
		for value in &self.values {
			writer.write_u32::<LittleEndian>(value.len() as u32)?;
			writer.write_all(value)?;
		}
		Ok(())
	}

	fn read_from(reader: &mut impl Read) -> std::io::Result<Option<CellRecord>> {
		let key_len = match reader.read_u32::<LittleEndian>() {
			Ok(len) => len,
			Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
			Err(e) => return Err(e),
		};
		let mut key = vec![0u8; key_len as usize];
		reader.read_exact(&mut key)?;

		let coords_len = reader.read_u32::<LittleEndian>()?;
		let mut coords = vec![0u8; coords_len as usize];
		reader.read_exact(&mut coords)?;

		let value_count = reader.read_u32::<LittleEndian>()?;
		let mut values = Vec::with_capacity(value_count as usize);
		for _ in 0..value_count {
			let value_len = reader.read_u32::<LittleEndian>()?;
			let mut value = vec![0u8; value_len as usize];
			reader.read_exact(&mut value)?;
			values.push(value);
		}
		Ok(Some(CellRecord { key, coords, values }))
	}
}

/// Buffers cells and spills sorted runs past the in-memory threshold.
#[derive(Debug)]
pub(crate) struct CellSorter {
	threshold: u64,
	buffered_bytes: u64,
	records: Vec<CellRecord>,
	runs: Vec<PathBuf>,
	scratch_dir: Option<PathBuf>,
	pub cell_count: u64,
}

impl CellSorter {
	pub fn new(threshold: u64) -> Self {
		Self {
			threshold: threshold.max(1),
			buffered_bytes: 0,
			records: Vec::new(),
			runs: Vec::new(),
			scratch_dir: None,
			cell_count: 0,
		}
	}

	pub fn push(&mut self, record: CellRecord) -> Result<()> {
		self.buffered_bytes += record.heap_bytes();
		self.records.push(record);
		self.cell_count += 1;
		if self.buffered_bytes > self.threshold {
			self.spill()?;
		}
		Ok(())
	}

	fn scratch_dir(&mut self) -> Result<PathBuf> {
		if let Some(dir) = &self.scratch_dir {
			return Ok(dir.clone());
		}
		let dir = std::env::temp_dir().join(format!("gridstore_sort_{}", uuid::Uuid::new_v4().simple()));
		std::fs::create_dir_all(&dir).map_err(|e| Error::io(dir.to_string_lossy(), e))?;
		self.scratch_dir = Some(dir.clone());
		Ok(dir)
	}

	fn spill(&mut self) -> Result<()> {
		let dir = self.scratch_dir()?;
		let path = dir.join(format!("run_{:06}", self.runs.len()));
		log::debug!(
			"spilling {} buffered cells ({} bytes) to {path:?}",
			self.records.len(),
			self.buffered_bytes
		);

		self.records.sort_by(|a, b| a.key.cmp(&b.key));
		let file = File::create(&path).map_err(|e| Error::io(path.to_string_lossy(), e))?;
		let mut writer = BufWriter::new(file);
		for record in self.records.drain(..) {
			record
				.write_to(&mut writer)
				.map_err(|e| Error::io(path.to_string_lossy(), e))?;
		}
		writer.flush().map_err(|e| Error::io(path.to_string_lossy(), e))?;

		self.buffered_bytes = 0;
		self.runs.push(path);
		Ok(())
	}

	/// Finishes buffering and returns the merged, key-ordered stream.
	pub fn into_sorted(mut self) -> Result<SortedCells> {
		self.records.sort_by(|a, b| a.key.cmp(&b.key));

		let mut streams: Vec<RecordStream> = Vec::with_capacity(self.runs.len() + 1);
		for path in self.runs.drain(..) {
			let file = File::open(&path).map_err(|e| Error::io(path.to_string_lossy(), e))?;
			streams.push(RecordStream::Run {
				reader: BufReader::new(file),
			});
		}
		streams.push(RecordStream::Memory {
			records: std::mem::take(&mut self.records).into_iter(),
		});

		let mut sorted = SortedCells {
			heads: Vec::with_capacity(streams.len()),
			streams,
			scratch_dir: self.scratch_dir.take(),
		};
		for index in 0..sorted.streams.len() {
			let head = sorted.streams[index].next_record()?;
			sorted.heads.push(head);
		}
		Ok(sorted)
	}
}

impl Drop for CellSorter {
	fn drop(&mut self) {
		if let Some(dir) = &self.scratch_dir {
			let _ = std::fs::remove_dir_all(dir);
		}
	}
}

enum RecordStream {
	Run { reader: BufReader<File> },
	Memory { records: std::vec::IntoIter<CellRecord> },
}

impl RecordStream {
	fn next_record(&mut self) -> Result<Option<CellRecord>> {
		match self {
			RecordStream::Run { reader } => {
				CellRecord::read_from(reader).map_err(|e| Error::io("<sort run>", e))
			}
			RecordStream::Memory { records } => Ok(records.next()),
		}
	}
}

/// The k-way merge over spilled runs and the final in-memory batch.
pub(crate) struct SortedCells {
	streams: Vec<RecordStream>,
	heads: Vec<Option<CellRecord>>,
	scratch_dir: Option<PathBuf>,
}

impl SortedCells {
	/// The next cell in key order, ties broken by insertion batch.
	pub fn next_cell(&mut self) -> Result<Option<CellRecord>> {
		let mut smallest: Option<usize> = None;
		for (index, head) in self.heads.iter().enumerate() {
			let Some(head) = head else { continue };
			match smallest {
				None => smallest = Some(index),
				Some(current) => {
					let current_key = &self.heads[current].as_ref().expect("head exists").key;
					if head.key < *current_key {
						smallest = Some(index);
					}
				}
			}
		}
		let Some(index) = smallest else {
			return Ok(None);
		};
		let record = self.heads[index].take();
		self.heads[index] = self.streams[index].next_record()?;
		Ok(record)
	}
}

impl Drop for SortedCells {
	fn drop(&mut self) {
		if let Some(dir) = &self.scratch_dir {
			let _ = std::fs::remove_dir_all(dir);
		}
	}
}
